// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire types and gRPC service of the mesh `tracespan` template, generated from `proto/`.
//!
//! The generated packages keep their protobuf nesting so cross-package references resolve; the
//! types used across the crate are re-exported at this level.

#![allow(clippy::all, clippy::pedantic, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod tracespan {
    tonic::include_proto!("tracespan");
}

pub mod istio {
    pub mod policy {
        pub mod v1beta1 {
            tonic::include_proto!("istio.policy.v1beta1");
        }
    }

    pub mod mixer {
        pub mod adapter {
            pub mod model {
                pub mod v1beta1 {
                    tonic::include_proto!("istio.mixer.adapter.model.v1beta1");
                }
            }
        }
    }
}

pub use istio::mixer::adapter::model::v1beta1::ReportResult;
pub use istio::policy::v1beta1::{value, Duration, IpAddress, TimeStamp, Value};
pub use tracespan::handle_trace_span_service_client::HandleTraceSpanServiceClient;
pub use tracespan::handle_trace_span_service_server::{
    HandleTraceSpanService, HandleTraceSpanServiceServer,
};
pub use tracespan::{HandleTraceSpanRequest, InstanceMsg};

/// Full gRPC path of the `HandleTraceSpan` method.
pub const HANDLE_TRACE_SPAN_PATH: &str = "/tracespan.HandleTraceSpanService/HandleTraceSpan";

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value {
            value: Some(value::Value::StringValue(value.into())),
        }
    }

    pub fn int64(value: i64) -> Self {
        Value {
            value: Some(value::Value::Int64Value(value)),
        }
    }

    pub fn bool(value: bool) -> Self {
        Value {
            value: Some(value::Value::BoolValue(value)),
        }
    }
}

impl TimeStamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        TimeStamp {
            value: Some(prost_types::Timestamp { seconds, nanos }),
        }
    }
}
