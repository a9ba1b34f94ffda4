//! HTTP edge: `POST /proxy/<dialect>/*rest` dispatches into the orchestrator;
//! `GET /health` reports liveness. Structure mirrors the example's Axum
//! server almost verbatim, swapping the WebSocket/RPC bridge for a streaming
//! HTTP response body.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use relay_queue::{heartbeat_size_bytes, HeartbeatMonitor};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::client_dialect::ClientDialect;
use crate::orchestrator::{ProxyOrchestrator, ProxyRequest};
use relay_queue::Identifier;

/// Cadence of the keep-alive SSE comment written on an otherwise-idle
/// streaming connection, so intermediaries don't time it out mid-wait.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub struct ServerConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 7860, request_timeout_secs: 300 }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<dyn ProxyOrchestrator>,
    pub shared_ips: Arc<std::collections::HashSet<String>>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/proxy/{dialect}/{*rest}", post(proxy_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "relay gateway listening");

    let shutdown = CancellationToken::new();
    let shutdown_for_axum = shutdown.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_for_axum.cancelled().await;
            })
            .await
            .ok();
    });

    Ok(ServerHandle { port: local_addr.port(), shutdown, server: server_task })
}

pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        tracing::info!("gateway shutdown initiated");
        self.shutdown.cancel();
    }

    pub async fn drain(self) {
        let _ = self.server.await;
        tracing::debug!("server task drained");
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "healthy"})))
}

/// Resolves the queueing/occupancy identifier for an inbound request (§4.4):
/// a bearer-token-bearing client is identified by token, a configured
/// shared-IP address by IP under the wider allowance, everyone else by IP.
fn resolve_identifier(
    headers: &axum::http::HeaderMap,
    shared_ips: &std::collections::HashSet<String>,
    client_ip: &str,
) -> Identifier {
    let user_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start_matches("Bearer ").trim().to_string());
    Identifier::resolve(user_token.as_deref(), shared_ips, client_ip)
}

async fn proxy_handler(
    State(state): State<AppState>,
    Path((dialect, _rest)): Path<(String, String)>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let Some(dialect) = ClientDialect::parse(&dialect) else {
        return (StatusCode::NOT_FOUND, format!("unknown dialect {dialect:?}")).into_response();
    };

    let Ok(parsed): Result<serde_json::Value, _> = serde_json::from_slice(&body) else {
        return (StatusCode::BAD_REQUEST, "malformed json body").into_response();
    };

    let Some(model) = parsed.get("model").and_then(|v| v.as_str()).map(str::to_string) else {
        return (StatusCode::BAD_REQUEST, "missing \"model\" field").into_response();
    };

    let streaming = parsed.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let identifier = resolve_identifier(&headers, &state.shared_ips, &client_ip);

    let request = ProxyRequest { model, body: parsed, streaming, dialect, identifier };

    let (_id, stream) = match state.orchestrator.handle(request).await {
        Ok(v) => v,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    if streaming {
        let load = state.orchestrator.load();
        let wired = wire_heartbeat(stream, heartbeat_size_bytes(load));
        let body = Body::from_stream(wired.map(|frame| Ok::<_, std::io::Error>(frame.into_bytes())));
        axum::response::Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .body(body)
            .expect("response builder with fixed headers never fails")
    } else {
        let aggregated = crate::client_dialect::aggregate_wire_chunks(dialect, stream).await;
        (StatusCode::OK, Json(aggregated)).into_response()
    }
}

/// Interleaves `inner` with a periodic SSE comment sized by `heartbeat_bytes`,
/// on its own task so a slow or stalled upstream still keeps the connection
/// alive. Tears the connection down after [`HeartbeatMonitor`] observes too
/// many consecutive back-pressured heartbeat writes in a row.
fn wire_heartbeat(mut inner: BoxStream<'static, String>, heartbeat_bytes: usize) -> ReceiverStream<String> {
    let (tx, rx) = tokio::sync::mpsc::channel::<String>(64);
    tokio::spawn(async move {
        let mut monitor = HeartbeatMonitor::new();
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let comment = format!(": {}\n\n", "0".repeat(heartbeat_bytes));
                    let backpressure = tx.try_send(comment).is_err();
                    if monitor.record_write(backpressure) {
                        return;
                    }
                }
                item = inner.next() => {
                    match item {
                        Some(frame) => {
                            if tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    });
    ReceiverStream::new(rx)
}
