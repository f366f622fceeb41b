// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the mesh input to the telemetry generator and a sink.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::LibraryError;
use crate::input_stats::InputStats;
use crate::mixer_input::MixerInput;
use crate::proto::InstanceMsg;
use crate::telemetry_flusher::TelemetrySink;
use crate::telemetry_generator::TelemetryGenerator;

pub struct Library {
    config: Arc<Config>,
    input: Option<MixerInput>,
    running: AtomicBool,
    stats_worker: Mutex<Option<CancellationToken>>,
}

impl Library {
    pub fn new(config: Arc<Config>, sink: Arc<dyn TelemetrySink>) -> Self {
        let generator = Arc::new(TelemetryGenerator::new(
            config.target_namespaces.clone(),
            config.ignored_namespaces.clone(),
        ));

        let input = match config.port {
            Some(port) => {
                let generator = Arc::clone(&generator);
                let processor = move |instance: &InstanceMsg| -> anyhow::Result<()> {
                    for record in generator.generate(instance) {
                        sink.track(record);
                    }
                    Ok(())
                };
                Some(MixerInput::new(
                    config.host.clone(),
                    port,
                    config.max_request_content_length,
                    Arc::new(processor),
                ))
            }
            None => {
                info!("No mesh input port configured, the input is disabled");
                None
            }
        };

        Library {
            config,
            input,
            running: AtomicBool::new(false),
            stats_worker: Mutex::new(None),
        }
    }

    /// Running and, when configured, with a running input.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.input.as_ref().map_or(true, |input| input.is_running())
    }

    pub fn input_stats(&self) -> Option<Arc<InputStats>> {
        self.input.as_ref().map(|input| input.stats())
    }

    pub async fn input_local_addr(&self) -> Option<SocketAddr> {
        match &self.input {
            Some(input) => input.local_addr().await,
            None => None,
        }
    }

    pub async fn run(&self) -> Result<(), LibraryError> {
        let mut stats_worker = self.stats_worker.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(LibraryError::AlreadyRunning);
        }

        if let Some(input) = &self.input {
            if let Err(e) = input.start().await {
                if let Err(stop_error) = input.stop().await {
                    debug!("Ignoring error while stopping the mesh input after a failed start: {stop_error}");
                }
                return Err(LibraryError::InputStart(e));
            }

            let cancel = CancellationToken::new();
            tokio::spawn(report_stats(
                input.stats(),
                Duration::from_secs(self.config.stats_interval_secs.max(1)),
                cancel.clone(),
            ));
            *stats_worker = Some(cancel);
        }

        self.running.store(true, Ordering::SeqCst);
        info!("Library is running");
        Ok(())
    }

    /// The library always ends up stopped; a failure to stop the input is still reported.
    pub async fn stop(&self) -> Result<(), LibraryError> {
        let mut stats_worker = self.stats_worker.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            return Err(LibraryError::NotRunning);
        }

        if let Some(cancel) = stats_worker.take() {
            cancel.cancel();
        }

        let result = match &self.input {
            Some(input) if input.is_running() => input.stop().await.map_err(|e| {
                error!("Could not stop the mesh input: {e}");
                LibraryError::InputStop(e)
            }),
            _ => Ok(()),
        };

        self.running.store(false, Ordering::SeqCst);
        info!("Library stopped");
        result
    }
}

async fn report_stats(stats: Arc<InputStats>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    // first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Stats worker stopped");
                return;
            }
            _ = interval.tick() => info!("Mesh input: [{stats}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryRecord;
    use tracing_test::traced_test;

    struct NoopSink;

    impl TelemetrySink for NoopSink {
        fn track(&self, _record: TelemetryRecord) {}
    }

    fn config(port: Option<u16>) -> Arc<Config> {
        Arc::new(Config {
            host: "127.0.0.1".to_string(),
            port,
            instrumentation_key: "ikey".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_run_and_stop_without_input() {
        let library = Library::new(config(None), Arc::new(NoopSink));
        assert!(library.input_stats().is_none());
        assert!(!library.is_running());
        assert!(matches!(library.stop().await, Err(LibraryError::NotRunning)));

        library.run().await.unwrap();
        assert!(library.is_running());
        assert!(matches!(library.run().await, Err(LibraryError::AlreadyRunning)));
        assert!(library.input_local_addr().await.is_none());

        library.stop().await.unwrap();
        assert!(!library.is_running());
    }

    #[tokio::test]
    async fn test_run_starts_the_input() {
        let library = Library::new(config(Some(0)), Arc::new(NoopSink));
        library.run().await.unwrap();
        assert!(library.is_running());
        assert!(library.input_local_addr().await.is_some());

        library.stop().await.unwrap();
        assert!(!library.is_running());
        assert!(library.input_local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_input_start_leaves_library_stopped() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let library = Library::new(config(Some(port)), Arc::new(NoopSink));
        assert!(matches!(library.run().await, Err(LibraryError::InputStart(_))));
        assert!(!library.is_running());
        assert!(matches!(library.stop().await, Err(LibraryError::NotRunning)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_lifecycle_is_logged() {
        let library = Library::new(config(Some(0)), Arc::new(NoopSink));
        library.run().await.unwrap();
        assert!(logs_contain("Mesh input listening on 127.0.0.1:"));
        assert!(logs_contain("Library is running"));

        library.stop().await.unwrap();
        assert!(logs_contain("Library stopped"));
        assert!(!logs_contain("Could not stop the mesh input"));
    }
}
