// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Control endpoint the cluster posts its id to. The id is published with the heartbeat.
//!
//! `POST` with `Content-Type: application/json` and a body of `{"clusterId": "<id>"}`.

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::InputError;
use crate::heartbeat::ClusterIdPublisher;
use crate::http_utils::{
    has_content_type, log_and_create_http_response, serve_tcp, verify_request_content_length,
    HttpResponse, SHUTDOWN_TIMEOUT, STOP_GRACE,
};

const MAX_CLUSTER_INFO_CONTENT_LENGTH: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterInfo {
    cluster_id: String,
}

struct RunningListener {
    cancel: CancellationToken,
    server: JoinHandle<()>,
    local_addr: SocketAddr,
}

pub struct ClusterInfoListener {
    host: String,
    port: u16,
    publisher: Arc<ClusterIdPublisher>,
    running: Mutex<Option<RunningListener>>,
}

impl ClusterInfoListener {
    pub fn new(host: impl Into<String>, port: u16, publisher: ClusterIdPublisher) -> Self {
        ClusterInfoListener {
            host: host.into(),
            port,
            publisher: Arc::new(publisher),
            running: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
    }

    /// Starting a running listener only logs.
    pub async fn start(&self) -> Result<(), InputError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Cluster info listener is already running");
            return Ok(());
        }

        let addr = format!("{}:{}", self.host, self.port);
        let bound = match TcpListener::bind(&addr).await {
            Ok(listener) => listener.local_addr().map(|local_addr| (listener, local_addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = bound.map_err(|source| InputError::Bind { addr, source })?;

        let publisher = Arc::clone(&self.publisher);
        let service = service_fn(move |req| Self::cluster_info_handler(req, Arc::clone(&publisher)));
        let cancel = CancellationToken::new();
        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = serve_tcp(listener, service, server_cancel, || {}).await {
                error!("Cluster info listener error: {e}");
            }
        });

        *running = Some(RunningListener {
            cancel,
            server,
            local_addr,
        });
        info!("Cluster info listener listening on {local_addr}");
        Ok(())
    }

    /// Stopping a stopped listener only logs.
    pub async fn stop(&self) -> Result<(), InputError> {
        let Some(mut running) = self.running.lock().await.take() else {
            debug!("Cluster info listener is not running");
            return Ok(());
        };

        running.cancel.cancel();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT + STOP_GRACE, &mut running.server).await {
            Ok(_) => {
                debug!("Cluster info listener stopped");
                Ok(())
            }
            Err(_) => {
                running.server.abort();
                Err(InputError::ShutdownTimeout)
            }
        }
    }

    async fn cluster_info_handler(
        req: Request<Incoming>,
        publisher: Arc<ClusterIdPublisher>,
    ) -> http::Result<HttpResponse> {
        if req.method() != Method::POST {
            return log_and_create_http_response(
                &format!("Unsupported method {} on the cluster info endpoint", req.method()),
                StatusCode::METHOD_NOT_ALLOWED,
            );
        }
        if !has_content_type(req.headers(), "application/json") {
            return log_and_create_http_response(
                "Cluster info must be sent as application/json",
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            );
        }
        if let Some(response) = verify_request_content_length(
            req.headers(),
            MAX_CLUSTER_INFO_CONTENT_LENGTH,
            "Error processing cluster info",
        ) {
            return response;
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading cluster info: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };
        let cluster_info: ClusterInfo = match serde_json::from_slice(&body) {
            Ok(cluster_info) => cluster_info,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error parsing cluster info: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        if !publisher.update_cluster_id(&cluster_info.cluster_id) {
            return log_and_create_http_response(
                "Cluster id cannot be empty",
                StatusCode::BAD_REQUEST,
            );
        }
        log_and_create_http_response(
            &format!("Cluster id set to {}", cluster_info.cluster_id),
            StatusCode::ACCEPTED,
        )
    }
}

impl Drop for ClusterInfoListener {
    fn drop(&mut self) {
        if let Ok(running) = self.running.try_lock() {
            if let Some(running) = running.as_ref() {
                running.cancel.cancel();
            }
        }
    }
}
