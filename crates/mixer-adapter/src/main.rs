// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use mixer_trace_agent::{
    cluster_info::ClusterInfoListener,
    config,
    heartbeat::{ClusterIdPublisher, HeartbeatProperties},
    host::Host,
    telemetry_aggregator::TelemetryAggregator,
    telemetry_flusher::{
        ChannelSink, IngestionFlusher, TelemetryFlusher, TELEMETRY_CHANNEL_BUFFER_SIZE,
    },
};

const HOST_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("MIXER_ADAPTER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config::Config::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on mixer adapter startup: {e}");
            return;
        }
    };

    let heartbeat = HeartbeatProperties::new();
    let aggregator = Arc::new(TokioMutex::new(TelemetryAggregator::default()));
    let flusher = match IngestionFlusher::new(aggregator, Arc::clone(&config), heartbeat.clone()) {
        Ok(flusher) => Arc::new(flusher),
        Err(e) => {
            error!("Error creating the telemetry flusher: {e}");
            return;
        }
    };

    if config.adaptive_sampling_enabled {
        info!(
            "Adaptive sampling enabled at {} items per second",
            config.adaptive_sampling_max_other_items_per_second
        );
    }

    let (tx, rx) = mpsc::channel(TELEMETRY_CHANNEL_BUFFER_SIZE);
    let flusher_cancel = CancellationToken::new();
    let flusher_task = {
        let flusher = Arc::clone(&flusher);
        let cancel = flusher_cancel.clone();
        tokio::spawn(async move { flusher.start_telemetry_flusher(rx, cancel).await })
    };

    let cluster_info = match config.control_port {
        Some(port) => {
            let listener =
                ClusterInfoListener::new(config.host.clone(), port, ClusterIdPublisher::new(heartbeat));
            match listener.start().await {
                Ok(()) => Some(listener),
                Err(e) => {
                    error!("Error starting the cluster info listener: {e}");
                    None
                }
            }
        }
        None => {
            info!("Cluster info listener disabled");
            None
        }
    };

    let cancel = CancellationToken::new();
    let host = Arc::new(Host::new(
        Arc::clone(&config),
        Arc::new(ChannelSink::new(tx)),
        HOST_CHECK_INTERVAL,
    ));
    let host_task = {
        let host = Arc::clone(&host);
        let cancel = cancel.clone();
        tokio::spawn(async move { host.run(cancel).await })
    };

    info!("Mixer adapter started");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for the shutdown signal: {e}");
    }
    info!("Shutting down the mixer adapter");

    cancel.cancel();
    if let Err(e) = host_task.await {
        error!("Host task failed: {e}");
    }
    if let Some(listener) = cluster_info {
        if let Err(e) = listener.stop().await {
            error!("Error stopping the cluster info listener: {e}");
        }
    }

    flusher_cancel.cancel();
    let pending = match flusher_task.await {
        Ok(pending) => pending,
        Err(e) => {
            error!("Telemetry flusher task failed: {e}");
            None
        }
    };
    if let Some(unsent) = flusher.flush(pending).await {
        error!(
            "{} telemetry records could not be sent before shutting down",
            unsent.len()
        );
    }
}
