// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of the mesh input. Monotonic for the lifetime of the input, shared by `Arc` between
/// connection handlers and the stats reporter.
#[derive(Debug, Default)]
pub struct InputStats {
    connection_count: AtomicU64,
    requests_received: AtomicU64,
    instances_succeeded: AtomicU64,
    instances_failed: AtomicU64,
}

impl InputStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_connection_count(&self) {
        self.connection_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_instances_succeeded(&self) {
        self.instances_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_instances_failed(&self) {
        self.instances_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    pub fn requests_received(&self) -> u64 {
        self.requests_received.load(Ordering::Relaxed)
    }

    pub fn instances_succeeded(&self) -> u64 {
        self.instances_succeeded.load(Ordering::Relaxed)
    }

    pub fn instances_failed(&self) -> u64 {
        self.instances_failed.load(Ordering::Relaxed)
    }
}

impl fmt::Display for InputStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionCount: {}, RequestsReceived: {}, InstancesSucceeded: {}, InstancesFailed: {}",
            self.connection_count(),
            self.requests_received(),
            self.instances_succeeded(),
            self.instances_failed()
        )
    }
}
