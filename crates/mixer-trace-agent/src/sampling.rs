// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Adaptive sampling of generated telemetry.
//!
//! [`AdaptiveSampler`] measures how many records arrive every second and adjusts a sampling
//! percentage so roughly `max_items_per_second` of them are kept. Whether a record is kept is
//! decided by its operation id, so the records of one operation are kept or dropped together.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::telemetry::TelemetryRecord;

const WINDOW: Duration = Duration::from_secs(1);
const MIN_SAMPLING_PERCENTAGE: f64 = 0.1;
const MAX_SAMPLING_PERCENTAGE: f64 = 100.0;

pub struct AdaptiveSampler {
    max_items_per_second: u32,
    sampling_percentage: f64,
    window_start: Instant,
    seen_in_window: u32,
    // decisions of the current and the previous window, so an operation spanning a percentage
    // change is not split
    current: HashMap<String, bool>,
    previous: HashMap<String, bool>,
}

impl AdaptiveSampler {
    pub fn new(max_items_per_second: u32) -> Self {
        AdaptiveSampler {
            max_items_per_second: max_items_per_second.max(1),
            sampling_percentage: MAX_SAMPLING_PERCENTAGE,
            window_start: Instant::now(),
            seen_in_window: 0,
            current: HashMap::new(),
            previous: HashMap::new(),
        }
    }

    /// A sampler for requests and dependencies, `None` when adaptive sampling is disabled.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .adaptive_sampling_enabled
            .then(|| Self::new(config.adaptive_sampling_max_other_items_per_second))
    }

    pub fn sampling_percentage(&self) -> f64 {
        self.sampling_percentage
    }

    /// Whether `record` should be kept.
    pub fn sample(&mut self, record: &TelemetryRecord) -> bool {
        self.sample_at(record, Instant::now())
    }

    fn sample_at(&mut self, record: &TelemetryRecord, now: Instant) -> bool {
        self.roll_window(now);
        self.seen_in_window = self.seen_in_window.saturating_add(1);

        let operation_id = &record.operation().operation_id;
        if let Some(&keep) = self.current.get(operation_id) {
            return keep;
        }
        let keep = match self.previous.get(operation_id) {
            Some(&keep) => keep,
            None => sampling_score(operation_id) < self.sampling_percentage,
        };
        self.current.insert(operation_id.clone(), keep);
        keep
    }

    fn roll_window(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < WINDOW {
            return;
        }

        // idle seconds since the last record count towards the rate
        let rate = f64::from(self.seen_in_window) / elapsed.as_secs_f64();
        let target = f64::from(self.max_items_per_second);
        let percentage = if rate <= target {
            MAX_SAMPLING_PERCENTAGE
        } else {
            (target / rate * 100.0).clamp(MIN_SAMPLING_PERCENTAGE, MAX_SAMPLING_PERCENTAGE)
        };
        if (percentage - self.sampling_percentage).abs() > f64::EPSILON {
            debug!(
                "Adaptive sampling at {rate:.1} items/s, keeping {percentage:.2}% of operations"
            );
        }

        self.sampling_percentage = percentage;
        self.previous = std::mem::take(&mut self.current);
        self.seen_in_window = 0;
        self.window_start = now;
    }
}

/// Maps an operation id onto `[0, 100)`: djb2 followed by the murmur3 finalizer.
fn sampling_score(operation_id: &str) -> f64 {
    let mut hash: u32 = 5381;
    for byte in operation_id.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(byte));
    }
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    f64::from(hash) / (f64::from(u32::MAX) + 1.0) * 100.0
}
