// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keeps a [`Library`] running, replacing it with a fresh one whenever it stops on its own.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::library::Library;
use crate::telemetry_flusher::TelemetrySink;

pub struct Host {
    config: Arc<Config>,
    sink: Arc<dyn TelemetrySink>,
    check_interval: Duration,
    library: RwLock<Option<Arc<Library>>>,
}

impl Host {
    pub fn new(config: Arc<Config>, sink: Arc<dyn TelemetrySink>, check_interval: Duration) -> Self {
        Host {
            config,
            sink,
            check_interval,
            library: RwLock::new(None),
        }
    }

    /// The library currently supervised, if one is running.
    pub async fn library(&self) -> Option<Arc<Library>> {
        self.library.read().await.clone()
    }

    /// Supervises the library until `cancel` fires, then stops it.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            self.ensure_running().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }

        if let Some(library) = self.library.write().await.take() {
            if let Err(e) = library.stop().await {
                debug!("Library did not stop cleanly: {e}");
            }
        }
        info!("Host stopped");
    }

    async fn ensure_running(&self) {
        let mut current = self.library.write().await;
        if current.as_ref().is_some_and(|library| library.is_running()) {
            return;
        }

        if let Some(stale) = current.take() {
            error!("Library stopped unexpectedly, restarting it");
            if let Err(e) = stale.stop().await {
                debug!("Ignoring error while stopping the stale library: {e}");
            }
        }

        let library = Arc::new(Library::new(
            Arc::clone(&self.config),
            Arc::clone(&self.sink),
        ));
        match library.run().await {
            Ok(()) => *current = Some(library),
            Err(e) => error!("Could not start the library, retrying in {:?}: {e}", self.check_interval),
        }
    }
}
