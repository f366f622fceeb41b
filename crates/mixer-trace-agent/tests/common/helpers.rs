// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions and instance fixtures for integration tests

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame};
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use mixer_trace_agent::proto::{
    value, HandleTraceSpanRequest, HandleTraceSpanServiceClient, InstanceMsg, IpAddress,
    ReportResult, Value, HANDLE_TRACE_SPAN_PATH,
};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{timeout, Sleep};
use tonic::Code;

/// An instance reported by the inbound proxy of `destination-deployment-1` for a call from
/// `source-deployment-1`, both in the `default` namespace.
///
/// Port and status code are string typed, the way some mesh templates emit them, so they read
/// as zero.
pub fn standard_instance() -> InstanceMsg {
    let mut instance = InstanceMsg::default();
    set_tags(
        &mut instance,
        &[
            ("context.reporter.uid", "kubernetes://destination-deployment-1"),
            ("context.reporter.kind", "inbound"),
            ("context.protocol", "http"),
            ("connection.event", ""),
            ("source.uid", "kubernetes://source-deployment-1"),
            ("source.workload.namespace", "default"),
            ("source.workload.name", "source-deployment"),
            ("source.labels.appinsights.monitoring.enabled", ""),
            ("source.role.name", "source"),
            ("source.role.instance", "source-1"),
            ("destination.uid", "kubernetes://destination-deployment-1"),
            ("destination.workload.namespace", "default"),
            ("destination.workload.name", "destination-deployment"),
            ("destination.labels.appinsights.monitoring.enabled", ""),
            ("destination.role.name", "destination"),
            ("destination.role.instance", "destination-1"),
            ("destination.port", "80"),
            ("destination.service.host", ""),
            ("http.useragent", "Mozilla"),
            ("http.status_code", "203"),
            ("http.path", "/some/path"),
            ("http.method", "GET"),
            ("host", "destination-1:80"),
            ("request.headers.request.id", "request-id-1"),
            ("request.scheme", "http"),
            ("request.path", "/some/path"),
            ("request.headers.synthetictest.runid", ""),
            ("request.headers.synthetictest.location", ""),
            ("request.headers.request.context", ""),
            ("response.headers.request.context", ""),
            ("api.service", ""),
            ("api.protocol", ""),
        ],
    );
    set_bool(&mut instance, "source.labels.istio.isingressgateway", false);
    for key in ["request.size", "response.size"] {
        instance.span_tags.insert(key.to_string(), Value::int64(0));
    }
    for key in ["source.ip", "destination.ip"] {
        instance.span_tags.insert(
            key.to_string(),
            Value {
                value: Some(value::Value::IpAddressValue(IpAddress::default())),
            },
        );
    }
    instance
}

pub fn set_tags(instance: &mut InstanceMsg, tags: &[(&str, &str)]) {
    for (key, value) in tags {
        instance
            .span_tags
            .insert(key.to_string(), Value::string(*value));
    }
}

pub fn set_bool(instance: &mut InstanceMsg, key: &str, value: bool) {
    instance.span_tags.insert(key.to_string(), Value::bool(value));
}

pub fn set_i64(instance: &mut InstanceMsg, key: &str, value: i64) {
    instance.span_tags.insert(key.to_string(), Value::int64(value));
}

/// Standard instance with its source and destination namespaces replaced.
pub fn instance_between(source_namespace: &str, destination_namespace: &str) -> InstanceMsg {
    let mut instance = standard_instance();
    set_tags(
        &mut instance,
        &[
            ("source.workload.namespace", source_namespace),
            ("destination.workload.namespace", destination_namespace),
        ],
    );
    instance
}

/// Same as [`instance_between`], reported by the outbound proxy of the source.
pub fn outbound_instance_between(source_namespace: &str, destination_namespace: &str) -> InstanceMsg {
    let mut instance = instance_between(source_namespace, destination_namespace);
    set_tags(
        &mut instance,
        &[
            ("context.reporter.uid", "kubernetes://source-deployment-1"),
            ("context.reporter.kind", "outbound"),
        ],
    );
    instance
}

/// Request carrying `count` standard instances.
pub fn create_test_request(count: usize) -> HandleTraceSpanRequest {
    HandleTraceSpanRequest {
        instances: (0..count).map(|_| standard_instance()).collect(),
        dedup_id: "dedup-1".to_string(),
    }
}

/// Calls `HandleTraceSpan` over a fresh gRPC connection.
pub async fn send_batch(
    port: u16,
    request: HandleTraceSpanRequest,
) -> Result<ReportResult, tonic::Status> {
    let mut client = timeout(
        Duration::from_secs(2),
        HandleTraceSpanServiceClient::connect(format!("http://127.0.0.1:{port}")),
    )
    .await
    .map_err(|_| tonic::Status::deadline_exceeded("connect timed out"))?
    .map_err(|e| tonic::Status::unavailable(e.to_string()))?;
    client
        .handle_trace_span(request)
        .await
        .map(tonic::Response::into_inner)
}

/// Length-prefixed gRPC message frame announcing `declared_len` bytes.
fn grpc_frame(declared_len: u32, message: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(5 + message.len());
    frame.put_u8(0);
    frame.put_u32(declared_len);
    frame.put_slice(message);
    frame.freeze()
}

async fn http2_sender<B>(
    port: u16,
) -> Result<hyper::client::conn::http2::SendRequest<B>, Box<dyn std::error::Error + Send + Sync>>
where
    B: Body + Unpin + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await??;
    let (sender, conn) =
        hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        let _ = conn.await;
    });
    Ok(sender)
}

fn grpc_request<B>(port: u16, body: B) -> Result<Request<B>, hyper::http::Error> {
    Request::builder()
        .method("POST")
        .uri(format!("http://127.0.0.1:{port}{HANDLE_TRACE_SPAN_PATH}"))
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(body)
}

/// Posts raw bytes as a single gRPC message and returns the call's `grpc-status`.
pub async fn send_raw_grpc_message(
    port: u16,
    message: &[u8],
) -> Result<Code, Box<dyn std::error::Error + Send + Sync>> {
    let mut sender = http2_sender(port).await?;
    let body = Full::new(grpc_frame(message.len() as u32, message));
    let response = timeout(
        Duration::from_secs(2),
        sender.send_request(grpc_request(port, body)?),
    )
    .await??;

    if let Some(status) = response.headers().get("grpc-status") {
        return Ok(Code::from_bytes(status.as_bytes()));
    }
    let collected = response.into_body().collect().await?;
    Ok(collected
        .trailers()
        .and_then(|trailers| trailers.get("grpc-status"))
        .map_or(Code::Unknown, |status| Code::from_bytes(status.as_bytes())))
}

/// A request body that announces a message of `declared_len` bytes, sends only the first few,
/// then fails the way a client dropping its connection does.
pub struct TruncatedBody {
    head: Option<Bytes>,
    delay: Pin<Box<Sleep>>,
}

impl TruncatedBody {
    pub fn new(declared_len: u32, sent: &[u8]) -> Self {
        TruncatedBody {
            head: Some(grpc_frame(declared_len, sent)),
            delay: Box::pin(tokio::time::sleep(Duration::from_millis(200))),
        }
    }
}

impl Body for TruncatedBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if let Some(head) = self.head.take() {
            return Poll::Ready(Some(Ok(Frame::data(head))));
        }
        match self.delay.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "client went away",
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Starts a `HandleTraceSpan` call whose body breaks off after a few bytes of a 1000 byte
/// message. The outcome of the call is not reported.
pub async fn send_truncated_batch(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut sender = http2_sender(port).await?;
    let request = grpc_request(port, TruncatedBody::new(1000, &[0x0a, 0x02, 0x08]))?;
    let _ = timeout(Duration::from_secs(2), sender.send_request(request)).await;
    Ok(())
}

/// Send an HTTP/1 request over TCP and return the response
pub async fn send_tcp_request_with_content_type(
    port: u16,
    uri: &str,
    method: &str,
    content_type: &str,
    body: Option<Vec<u8>>,
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error + Send + Sync>> {
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Content-Type", content_type);

    let response = if let Some(body_data) = body {
        let body_len = body_data.len();
        request_builder = request_builder.header("Content-Length", body_len.to_string());
        let request = request_builder.body(Full::new(Bytes::from(body_data)))?;
        timeout(Duration::from_secs(2), sender.send_request(request)).await??
    } else {
        let request = request_builder.body(Full::new(Bytes::new()))?;
        timeout(Duration::from_secs(2), sender.send_request(request)).await??
    };

    Ok(response)
}

pub async fn read_body(response: Response<hyper::body::Incoming>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes().to_vec())
        .unwrap_or_default()
}

/// Polls `condition` until it holds or `deadline` elapses.
pub async fn eventually<F: Fn() -> bool>(condition: F, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
