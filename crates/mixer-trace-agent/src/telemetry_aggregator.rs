// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use tracing::error;

use crate::telemetry::TelemetryRecord;

/// Upper bound of records posted in a single request to the ingestion endpoint.
pub const MAX_BATCH_SIZE: usize = 500;
/// Records held while the ingestion endpoint is unavailable, beyond this the oldest are dropped.
pub const MAX_QUEUE_SIZE: usize = 100_000;

/// Takes in individual telemetry records and aggregates them into batches to be flushed.
pub struct TelemetryAggregator {
    queue: VecDeque<TelemetryRecord>,
    max_batch_size: usize,
    max_queue_size: usize,
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        TelemetryAggregator::new(MAX_BATCH_SIZE, MAX_QUEUE_SIZE)
    }
}

impl TelemetryAggregator {
    pub fn new(max_batch_size: usize, max_queue_size: usize) -> Self {
        TelemetryAggregator {
            queue: VecDeque::with_capacity(128), // arbitrary capacity for the record queue
            max_batch_size: max_batch_size.max(1),
            max_queue_size: max_queue_size.max(1),
        }
    }

    /// Takes in an individual record. A full queue makes room by dropping its oldest record.
    pub fn add(&mut self, record: TelemetryRecord) {
        if self.queue.len() >= self.max_queue_size {
            if let Some(dropped) = self.queue.pop_front() {
                error!(
                    "Telemetry queue is full ({} records), dropping the oldest record {}",
                    self.max_queue_size,
                    dropped.id()
                );
            }
        }
        self.queue.push_back(record);
    }

    /// Returns the oldest records, at most `max_batch_size` of them. Empty when nothing is queued.
    pub fn get_batch(&mut self) -> Vec<TelemetryRecord> {
        let size = self.queue.len().min(self.max_batch_size);
        self.queue.drain(..size).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
