// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Properties attached to the periodic heartbeat sent to the backend.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

pub const CLUSTER_ID_PROPERTY: &str = "clusterID";

/// Thread-safe property map read by the heartbeat and written by the control endpoint.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatProperties {
    properties: Arc<RwLock<BTreeMap<String, String>>>,
}

impl HeartbeatProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the property, or replaces its value if it is already there. Returns whether it was
    /// newly added.
    pub fn set(&self, name: &str, value: &str) -> bool {
        match self.properties.write() {
            Ok(mut properties) => properties
                .insert(name.to_string(), value.to_string())
                .is_none(),
            Err(e) => {
                error!("Heartbeat properties lock is poisoned: {e}");
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.properties
            .read()
            .ok()
            .and_then(|properties| properties.get(name).cloned())
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.properties
            .read()
            .map(|properties| properties.clone())
            .unwrap_or_default()
    }
}

/// Publishes the id of the cluster the adapter runs in.
#[derive(Debug, Clone)]
pub struct ClusterIdPublisher {
    properties: HeartbeatProperties,
}

impl ClusterIdPublisher {
    pub fn new(properties: HeartbeatProperties) -> Self {
        ClusterIdPublisher { properties }
    }

    /// Returns `false`, and leaves the properties untouched, for an empty id.
    pub fn update_cluster_id(&self, cluster_id: &str) -> bool {
        if cluster_id.trim().is_empty() {
            error!("Ignoring an empty cluster id");
            return false;
        }

        if self.properties.set(CLUSTER_ID_PROPERTY, cluster_id) {
            debug!("Cluster id added to the heartbeat: {cluster_id}");
        } else {
            debug!("Cluster id of the heartbeat updated: {cluster_id}");
        }
        true
    }

    pub fn properties(&self) -> &HeartbeatProperties {
        &self.properties
    }
}
