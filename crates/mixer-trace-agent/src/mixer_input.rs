// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! gRPC input receiving trace span instance batches from the mesh.
//!
//! The input serves `tracespan.HandleTraceSpanService`. Every instance of a
//! [`HandleTraceSpanRequest`] is handed to an [`InstanceProcessor`]; a failing or panicking
//! instance is counted and logged without affecting the rest of the batch. A request body that
//! breaks mid-stream stops the whole input so the host can bring up a fresh one.

use futures::stream::{self, Stream};
use http_body_util::BodyExt;
use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tower::util::MapRequestLayer;
use tracing::{debug, error, info};

use crate::error::InputError;
use crate::http_utils::{SHUTDOWN_TIMEOUT, STOP_GRACE};
use crate::input_stats::InputStats;
use crate::proto::{
    HandleTraceSpanRequest, HandleTraceSpanService, HandleTraceSpanServiceServer, InstanceMsg,
    ReportResult,
};

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

/// Handles a single instance of a batch.
pub trait InstanceProcessor: Send + Sync {
    fn process(&self, instance: &InstanceMsg) -> anyhow::Result<()>;
}

impl<F> InstanceProcessor for F
where
    F: Fn(&InstanceMsg) -> anyhow::Result<()> + Send + Sync,
{
    fn process(&self, instance: &InstanceMsg) -> anyhow::Result<()> {
        self(instance)
    }
}

struct RunningInput {
    cancel: CancellationToken,
    server: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Shared by every call of one run of the input.
struct TraceSpanHandler {
    processor: Arc<dyn InstanceProcessor>,
    stats: Arc<InputStats>,
    cancel: CancellationToken,
}

pub struct MixerInput {
    host: String,
    port: u16,
    max_request_content_length: usize,
    processor: Arc<dyn InstanceProcessor>,
    stats: Arc<InputStats>,
    state: Arc<AtomicU8>,
    running: Mutex<Option<RunningInput>>,
}

impl MixerInput {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        max_request_content_length: usize,
        processor: Arc<dyn InstanceProcessor>,
    ) -> Self {
        MixerInput {
            host: host.into(),
            port,
            max_request_content_length,
            processor,
            stats: Arc::new(InputStats::new()),
            state: Arc::new(AtomicU8::new(STOPPED)),
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    pub fn stats(&self) -> Arc<InputStats> {
        Arc::clone(&self.stats)
    }

    /// Address the input is bound to, `None` when not running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        if !self.is_running() {
            return None;
        }
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
    }

    /// Binds the listener and starts serving batches in the background.
    pub async fn start(&self) -> Result<(), InputError> {
        if self
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(InputError::AlreadyRunning);
        }

        let addr = format!("{}:{}", self.host, self.port);
        let bound = match TcpListener::bind(&addr).await {
            Ok(listener) => listener.local_addr().map(|local_addr| (listener, local_addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.state.store(STOPPED, Ordering::SeqCst);
                return Err(InputError::Bind { addr, source });
            }
        };

        let cancel = CancellationToken::new();
        let service = HandleTraceSpanServiceServer::new(TraceSpanHandler {
            processor: Arc::clone(&self.processor),
            stats: Arc::clone(&self.stats),
            cancel: cancel.clone(),
        })
        .max_decoding_message_size(self.max_request_content_length);

        let mut running = self.running.lock().await;
        self.state.store(RUNNING, Ordering::SeqCst);

        let state = Arc::clone(&self.state);
        let incoming = Box::pin(accept_connections(listener, Arc::clone(&self.stats)));
        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            let serve = Server::builder()
                .layer(MapRequestLayer::new(stop_on_broken_body(server_cancel.clone())))
                .add_service(service)
                .serve_with_incoming_shutdown(incoming, server_cancel.cancelled());
            tokio::pin!(serve);

            let drain_deadline = async {
                server_cancel.cancelled().await;
                tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
            };
            tokio::select! {
                result = &mut serve => {
                    if let Err(e) = result {
                        error!("Mesh input server error: {e}");
                    }
                }
                _ = drain_deadline => {
                    error!("Open connections did not finish within {SHUTDOWN_TIMEOUT:?}, dropping them");
                }
            }

            if state
                .compare_exchange(RUNNING, STOPPED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                info!("Mesh input stopped on its own");
            }
        });

        *running = Some(RunningInput {
            cancel,
            server,
            local_addr,
        });
        info!("Mesh input listening on {local_addr}");
        Ok(())
    }

    /// Stops accepting batches and waits for open connections to finish. The input always ends
    /// up stopped; a connection that outlives the shutdown timeout is reported as an error.
    pub async fn stop(&self) -> Result<(), InputError> {
        if self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(InputError::NotRunning);
        }

        let running = self.running.lock().await.take();
        let result = match running {
            Some(mut running) => {
                running.cancel.cancel();
                match tokio::time::timeout(SHUTDOWN_TIMEOUT + STOP_GRACE, &mut running.server).await {
                    Ok(_) => Ok(()),
                    Err(_) => {
                        running.server.abort();
                        Err(InputError::ShutdownTimeout)
                    }
                }
            }
            None => Ok(()),
        };

        self.state.store(STOPPED, Ordering::SeqCst);
        debug!("Mesh input stopped");
        result
    }
}

#[tonic::async_trait]
impl HandleTraceSpanService for TraceSpanHandler {
    async fn handle_trace_span(
        &self,
        request: Request<HandleTraceSpanRequest>,
    ) -> Result<Response<ReportResult>, Status> {
        self.stats.increment_requests_received();
        let request = request.into_inner();
        debug!(
            "Received a batch of {} instances, dedup id: {}",
            request.instances.len(),
            request.dedup_id
        );

        self.process_batch(&request.instances);
        Ok(Response::new(ReportResult::default()))
    }
}

impl TraceSpanHandler {
    fn process_batch(&self, instances: &[InstanceMsg]) {
        for instance in instances {
            if self.cancel.is_cancelled() {
                debug!("Input is stopping, dropping the rest of the batch");
                break;
            }

            match catch_unwind(AssertUnwindSafe(|| self.processor.process(instance))) {
                Ok(Ok(())) => self.stats.increment_instances_succeeded(),
                Ok(Err(e)) => {
                    self.stats.increment_instances_failed();
                    error!("Failed to process instance: {e:#}");
                }
                Err(panic) => {
                    self.stats.increment_instances_failed();
                    error!(
                        "Instance processor panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
    }
}

impl Drop for MixerInput {
    fn drop(&mut self) {
        if let Ok(running) = self.running.try_lock() {
            if let Some(running) = running.as_ref() {
                running.cancel.cancel();
            }
        }
    }
}

/// Yields accepted connections, counting each one. Transient accept errors are skipped.
fn accept_connections(
    listener: TcpListener,
    stats: Arc<InputStats>,
) -> impl Stream<Item = io::Result<TcpStream>> {
    stream::unfold((listener, stats), |(listener, stats)| async move {
        let accepted = loop {
            match listener.accept().await {
                Ok((conn, _)) => {
                    stats.increment_connection_count();
                    break Ok(conn);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => break Err(e),
            }
        };
        Some((accepted, (listener, stats)))
    })
}

/// Wraps every request body so a transport error while reading it cancels the input.
fn stop_on_broken_body(
    cancel: CancellationToken,
) -> impl Fn(hyper::Request<tonic::body::Body>) -> hyper::Request<tonic::body::Body> + Clone {
    move |req| {
        let cancel = cancel.clone();
        req.map(|body| {
            tonic::body::Body::new(body.map_err(move |status| {
                error!("Error reading trace span batch, stopping the input: {status}");
                cancel.cancel();
                status
            }))
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
