// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;

use crate::correlation::extract_operation_root;

/// Fields shared by requests and dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationData {
    pub name: Option<String>,
    /// Hierarchical id of this operation
    pub id: String,
    pub parent_id: String,
    /// Trace root, derived from `id`
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration: TimeDelta,
    pub success: bool,
    pub role_name: String,
    pub role_instance: String,
    pub properties: BTreeMap<String, String>,
}

impl OperationData {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Option<String>,
        id: String,
        parent_id: String,
        timestamp: DateTime<Utc>,
        duration: TimeDelta,
        success: bool,
        role_name: String,
        role_instance: String,
        properties: BTreeMap<String, String>,
    ) -> Self {
        let operation_id = extract_operation_root(&id).to_string();
        OperationData {
            name,
            id,
            parent_id,
            operation_id,
            timestamp,
            duration,
            success,
            role_name,
            role_instance,
            properties,
        }
    }
}

/// Marks a request as coming from an availability test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticContext {
    pub synthetic_source: String,
    pub user_id: String,
    pub session_id: String,
}

/// Server side of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTelemetry {
    pub operation: OperationData,
    pub response_code: String,
    pub url: Option<String>,
    pub user_agent: String,
    /// App id of the caller, from its request context header
    pub source: Option<String>,
    pub synthetic: Option<SyntheticContext>,
}

/// Client side of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyTelemetry {
    pub operation: OperationData,
    pub result_code: String,
    /// Full url of the call
    pub data: String,
    pub dependency_type: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    Request(RequestTelemetry),
    Dependency(DependencyTelemetry),
}

impl TelemetryRecord {
    pub fn operation(&self) -> &OperationData {
        match self {
            TelemetryRecord::Request(request) => &request.operation,
            TelemetryRecord::Dependency(dependency) => &dependency.operation,
        }
    }

    pub fn id(&self) -> &str {
        &self.operation().id
    }

    pub fn parent_id(&self) -> &str {
        &self.operation().parent_id
    }

    pub fn as_request(&self) -> Option<&RequestTelemetry> {
        match self {
            TelemetryRecord::Request(request) => Some(request),
            TelemetryRecord::Dependency(_) => None,
        }
    }

    pub fn as_dependency(&self) -> Option<&DependencyTelemetry> {
        match self {
            TelemetryRecord::Request(_) => None,
            TelemetryRecord::Dependency(dependency) => Some(dependency),
        }
    }
}
