// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time;
use tokio::sync::mpsc::{error::TrySendError, Receiver, Sender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::Config;
use crate::heartbeat::HeartbeatProperties;
use crate::http_utils::build_client;
use crate::sampling::AdaptiveSampler;
use crate::telemetry::{OperationData, TelemetryRecord};
use crate::telemetry_aggregator::TelemetryAggregator;

pub const TELEMETRY_CHANNEL_BUFFER_SIZE: usize = 10_000;
const SDK_VERSION: &str = "aks_plugin:0.0.0";
const HEARTBEAT_METRIC_NAME: &str = "HeartbeatState";
const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(30);

/// Destination of generated telemetry.
pub trait TelemetrySink: Send + Sync {
    fn track(&self, record: TelemetryRecord);
}

/// Forwards records to a flusher through a bounded channel. Records are dropped, with an error
/// log, while the channel is full.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<TelemetryRecord>,
}

impl ChannelSink {
    pub fn new(tx: Sender<TelemetryRecord>) -> Self {
        ChannelSink { tx }
    }
}

impl TelemetrySink for ChannelSink {
    fn track(&self, record: TelemetryRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                error!("Telemetry channel is full, dropping record {}", record.id());
            }
            Err(TrySendError::Closed(record)) => {
                error!("Telemetry channel is closed, dropping record {}", record.id());
            }
        }
    }
}

#[async_trait]
pub trait TelemetryFlusher {
    /// Starts a flusher that listens for records sent to the tokio mpsc Receiver, flushing them
    /// every flush interval and sending a heartbeat every heartbeat interval.
    ///
    /// Runs until `cancel` fires. Records still in the channel by then are moved to the
    /// aggregator, and the records awaiting a retry are returned for a final flush.
    async fn start_telemetry_flusher(
        &self,
        rx: Receiver<TelemetryRecord>,
        cancel: CancellationToken,
    ) -> Option<Vec<TelemetryRecord>>;
    /// Posts the records to the ingestion endpoint. Returns them back if they should be retried.
    async fn send(&self, records: Vec<TelemetryRecord>) -> Option<Vec<TelemetryRecord>>;
    /// Flushes every batch available on the aggregator. If `failed_records` is provided, they are
    /// sent first. Returns any records that failed to send and should be retried.
    async fn flush(&self, failed_records: Option<Vec<TelemetryRecord>>)
        -> Option<Vec<TelemetryRecord>>;
    async fn send_heartbeat(&self);
}

#[derive(Clone)]
pub struct IngestionFlusher {
    pub aggregator: Arc<Mutex<TelemetryAggregator>>,
    pub config: Arc<Config>,
    pub heartbeat: HeartbeatProperties,
    client: reqwest::Client,
}

impl IngestionFlusher {
    pub fn new(
        aggregator: Arc<Mutex<TelemetryAggregator>>,
        config: Arc<Config>,
        heartbeat: HeartbeatProperties,
    ) -> Result<Self, Box<dyn Error>> {
        let client = build_client(config.proxy_url.as_deref(), REQUEST_TIMEOUT)?;
        Ok(IngestionFlusher {
            aggregator,
            config,
            heartbeat,
            client,
        })
    }

    async fn post(&self, body: String) -> Result<reqwest::StatusCode, reqwest::Error> {
        let response = self
            .client
            .post(&self.config.ingestion_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Ok(response.status())
    }
}

/// Throttling and server side errors are worth another try, other failures are not.
fn is_retriable(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl TelemetryFlusher for IngestionFlusher {
    async fn start_telemetry_flusher(
        &self,
        mut rx: Receiver<TelemetryRecord>,
        cancel: CancellationToken,
    ) -> Option<Vec<TelemetryRecord>> {
        let receiver = {
            let aggregator = Arc::clone(&self.aggregator);
            let mut sampler = AdaptiveSampler::from_config(&self.config);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut keep = move |record: &TelemetryRecord| {
                    sampler.as_mut().map_or(true, |sampler| sampler.sample(record))
                };
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        record = rx.recv() => match record {
                            Some(record) if keep(&record) => aggregator.lock().await.add(record),
                            Some(_) => {}
                            None => return,
                        },
                    }
                }
                rx.close();
                let mut guard = aggregator.lock().await;
                while let Ok(record) = rx.try_recv() {
                    if keep(&record) {
                        guard.add(record);
                    }
                }
            })
        };

        let mut flush_interval =
            tokio::time::interval(time::Duration::from_secs(self.config.flush_interval_secs));
        let mut heartbeat_interval = tokio::time::interval(time::Duration::from_secs(
            self.config.heartbeat_interval_secs,
        ));
        // both intervals tick immediately, skip that first tick
        flush_interval.tick().await;
        heartbeat_interval.tick().await;

        let mut failed_records = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = flush_interval.tick() => {
                    failed_records = self.flush(failed_records).await;
                }
                _ = heartbeat_interval.tick() => {
                    self.send_heartbeat().await;
                }
            }
        }

        if let Err(e) = receiver.await {
            error!("Telemetry receiver task failed: {e}");
        }
        debug!("Telemetry flusher stopped");
        failed_records
    }

    async fn flush(
        &self,
        failed_records: Option<Vec<TelemetryRecord>>,
    ) -> Option<Vec<TelemetryRecord>> {
        if let Some(records) = failed_records {
            if !records.is_empty() {
                debug!("Retrying to send {} previously failed records", records.len());
                let retry_result = self.send(records).await;
                if retry_result.is_some() {
                    return retry_result;
                }
            }
        }

        loop {
            // lock is released before the send
            let records = self.aggregator.lock().await.get_batch();
            if records.is_empty() {
                return None;
            }
            if let Some(failed) = self.send(records).await {
                return Some(failed);
            }
        }
    }

    async fn send(&self, records: Vec<TelemetryRecord>) -> Option<Vec<TelemetryRecord>> {
        if records.is_empty() {
            return None;
        }
        debug!("Flushing {} telemetry records", records.len());

        let envelopes: Vec<Envelope> = records
            .iter()
            .map(|record| Envelope::from_record(record, &self.config.instrumentation_key))
            .collect();
        let body = match serde_json::to_string(&envelopes) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize telemetry, dropping {} records: {e}", records.len());
                return None;
            }
        };

        match self.post(body).await {
            Ok(status) if status.is_success() => {
                debug!("Successfully flushed telemetry");
                None
            }
            Ok(status) if is_retriable(status) => {
                error!("Ingestion endpoint responded {status}, will retry");
                Some(records)
            }
            Ok(status) => {
                error!(
                    "Ingestion endpoint rejected {} records with {status}, dropping them",
                    records.len()
                );
                None
            }
            Err(e) => {
                error!("Error sending telemetry: {e}");
                Some(records)
            }
        }
    }

    async fn send_heartbeat(&self) {
        let envelope = Envelope::heartbeat(
            Utc::now(),
            self.heartbeat.snapshot(),
            &self.config.instrumentation_key,
        );
        let body = match serde_json::to_string(&[envelope]) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize the heartbeat: {e}");
                return;
            }
        };
        match self.post(body).await {
            Ok(status) if status.is_success() => debug!("Heartbeat sent"),
            Ok(status) => error!("Ingestion endpoint responded {status} to the heartbeat"),
            Err(e) => error!("Error sending the heartbeat: {e}"),
        }
    }
}

/// Formats a duration as `d.hh:mm:ss.fffffff`. Negative durations format as zero.
pub fn format_duration(duration: TimeDelta) -> String {
    let duration = duration.max(TimeDelta::zero());
    let seconds = duration.num_seconds();
    let ticks = duration.subsec_nanos() / 100;
    format!(
        "{}.{:02}:{:02}:{:02}.{:07}",
        seconds / 86_400,
        (seconds % 86_400) / 3_600,
        (seconds % 3_600) / 60,
        seconds % 60,
        ticks
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub name: String,
    pub time: String,
    pub i_key: String,
    pub tags: BTreeMap<&'static str, String>,
    pub data: EnvelopeData,
}

#[derive(Debug, Serialize)]
#[serde(tag = "baseType", content = "baseData")]
pub enum EnvelopeData {
    RequestData(RequestData),
    RemoteDependencyData(RemoteDependencyData),
    MetricData(MetricData),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub ver: u8,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub duration: String,
    pub response_code: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDependencyData {
    pub ver: u8,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub duration: String,
    pub result_code: String,
    pub success: bool,
    pub data: String,
    pub target: String,
    #[serde(rename = "type")]
    pub dependency_type: String,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct MetricData {
    pub ver: u8,
    pub metrics: Vec<DataPoint>,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct DataPoint {
    pub name: String,
    pub value: f64,
    pub count: u32,
}

fn operation_tags(operation: &OperationData) -> BTreeMap<&'static str, String> {
    let mut tags = BTreeMap::new();
    tags.insert("ai.operation.id", operation.operation_id.clone());
    tags.insert("ai.operation.parentId", operation.parent_id.clone());
    if let Some(name) = &operation.name {
        tags.insert("ai.operation.name", name.clone());
    }
    tags.insert("ai.cloud.role", operation.role_name.clone());
    tags.insert("ai.cloud.roleInstance", operation.role_instance.clone());
    tags.insert("ai.internal.sdkVersion", SDK_VERSION.to_string());
    tags
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Envelope {
    pub fn from_record(record: &TelemetryRecord, instrumentation_key: &str) -> Self {
        let operation = record.operation();
        let mut tags = operation_tags(operation);

        let (kind, data) = match record {
            TelemetryRecord::Request(request) => {
                if !request.user_agent.is_empty() {
                    tags.insert("ai.user.userAgent", request.user_agent.clone());
                }
                if let Some(synthetic) = &request.synthetic {
                    tags.insert(
                        "ai.operation.syntheticSource",
                        synthetic.synthetic_source.clone(),
                    );
                    tags.insert("ai.user.id", synthetic.user_id.clone());
                    tags.insert("ai.session.id", synthetic.session_id.clone());
                }
                (
                    "Request",
                    EnvelopeData::RequestData(RequestData {
                        ver: 2,
                        id: operation.id.clone(),
                        name: operation.name.clone(),
                        duration: format_duration(operation.duration),
                        response_code: request.response_code.clone(),
                        success: operation.success,
                        url: request.url.clone(),
                        source: request.source.clone(),
                        properties: operation.properties.clone(),
                    }),
                )
            }
            TelemetryRecord::Dependency(dependency) => (
                "RemoteDependency",
                EnvelopeData::RemoteDependencyData(RemoteDependencyData {
                    ver: 2,
                    id: operation.id.clone(),
                    name: operation.name.clone(),
                    duration: format_duration(operation.duration),
                    result_code: dependency.result_code.clone(),
                    success: operation.success,
                    data: dependency.data.clone(),
                    target: dependency.target.clone(),
                    dependency_type: dependency.dependency_type.clone(),
                    properties: operation.properties.clone(),
                }),
            ),
        };

        Envelope {
            name: format!("Microsoft.ApplicationInsights.{instrumentation_key}.{kind}"),
            time: format_time(operation.timestamp),
            i_key: instrumentation_key.to_string(),
            tags,
            data,
        }
    }

    pub fn heartbeat(
        time: DateTime<Utc>,
        properties: BTreeMap<String, String>,
        instrumentation_key: &str,
    ) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("ai.internal.sdkVersion", SDK_VERSION.to_string());
        Envelope {
            name: format!("Microsoft.ApplicationInsights.{instrumentation_key}.Metric"),
            time: format_time(time),
            i_key: instrumentation_key.to_string(),
            tags,
            data: EnvelopeData::MetricData(MetricData {
                ver: 2,
                metrics: vec![DataPoint {
                    name: HEARTBEAT_METRIC_NAME.to_string(),
                    value: 0.0,
                    count: 1,
                }],
                properties,
            }),
        }
    }
}
