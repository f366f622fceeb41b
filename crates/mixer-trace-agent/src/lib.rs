// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns service mesh trace span instances into correlated request and dependency telemetry.
//!
//! Sidecar proxies report every call twice, once from the caller's side and once from the
//! callee's side. [`telemetry_generator::TelemetryGenerator`] picks the report to act on, builds
//! `Request`/`Dependency` records and threads hierarchical correlation ids through them so the
//! backend can stitch the hops of a trace together. [`mixer_input::MixerInput`] receives the
//! instance batches over gRPC and [`library::Library`] wires both to a telemetry sink.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod cluster_info;
pub mod config;
pub mod correlation;
pub mod error;
pub mod heartbeat;
pub mod host;
pub mod http_utils;
pub mod input_stats;
pub mod instance_tags;
pub mod interest;
pub mod library;
pub mod mixer_input;
pub mod proto;
pub mod sampling;
pub mod telemetry;
pub mod telemetry_aggregator;
pub mod telemetry_flusher;
pub mod telemetry_generator;
