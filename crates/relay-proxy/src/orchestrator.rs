//! Connects the queue, pool, and stream pipeline to the HTTP edge (§4.7).
//!
//! `ProxyOrchestrator` is the seam between `server.rs`'s handlers and actual
//! request servicing, mirroring the production/mock split the engine side
//! uses for the same reason: handler tests exercise `MockOrchestrator`
//! without a real upstream connection.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use relay_core::{CanonicalEvent, GatewayError, ModelFamily, RequestId};
use relay_pool::{KeyPool, RouteTarget};
use relay_providers::{classify_http_error, parse_reset_header, CheckFailure, GcpOps};
use relay_queue::{DequeueOutcome, Identifier, RequestQueue, MAX_RETRIES};
use relay_stream::{SseTextAdapter, Transformer};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::client_dialect::{ClientDialect, OutputStyle};
use crate::dispatch::Dispatcher;
use crate::preprocess::build_signed_request;

/// One in-flight proxied request, as submitted to the orchestrator.
pub struct ProxyRequest {
    pub model: String,
    pub body: serde_json::Value,
    pub streaming: bool,
    pub dialect: ClientDialect,
    pub identifier: Identifier,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Validated,
    Enqueued,
    Dispatching,
    Streaming,
    Success,
    RetryableFailure,
    FatalFailure,
}

#[async_trait]
pub trait ProxyOrchestrator: Send + Sync {
    async fn handle(&self, request: ProxyRequest) -> Result<(RequestId, BoxStream<'static, String>), GatewayError>;
    fn abort(&self, id: &RequestId) -> bool;
    fn state(&self, id: &RequestId) -> Option<RequestState>;
    fn abort_all(&self) -> usize;
    /// Current queue load, for sizing the transport's heartbeat padding.
    fn load(&self) -> usize;
}

struct ActiveRequest {
    cancel: CancellationToken,
    state: Arc<std::sync::atomic::AtomicU8>,
}

fn state_to_code(s: RequestState) -> u8 {
    s as u8
}

fn code_to_state(code: u8) -> RequestState {
    match code {
        0 => RequestState::Received,
        1 => RequestState::Validated,
        2 => RequestState::Enqueued,
        3 => RequestState::Dispatching,
        4 => RequestState::Streaming,
        5 => RequestState::Success,
        6 => RequestState::RetryableFailure,
        _ => RequestState::FatalFailure,
    }
}

/// Production orchestrator: resolves a route, waits its turn in
/// [`RequestQueue`], signs and dispatches the upstream call, and runs the
/// response through the adapter/transformer/writer pipeline.
pub struct GatewayOrchestrator {
    pool: Arc<KeyPool>,
    queue: Arc<RequestQueue>,
    dispatcher: Arc<dyn Dispatcher>,
    gcp_ops: Arc<GcpOps>,
    active: Arc<DashMap<RequestId, ActiveRequest>>,
}

impl GatewayOrchestrator {
    pub fn new(pool: Arc<KeyPool>, queue: Arc<RequestQueue>, dispatcher: Arc<dyn Dispatcher>, gcp_ops: Arc<GcpOps>) -> Self {
        Self { pool, queue, dispatcher, gcp_ops, active: Arc::new(DashMap::new()) }
    }
}

#[async_trait]
impl ProxyOrchestrator for GatewayOrchestrator {
    async fn handle(&self, request: ProxyRequest) -> Result<(RequestId, BoxStream<'static, String>), GatewayError> {
        let target = self.pool.resolve(&request.model, request.dialect.service_hint())?;

        let id = RequestId::new();
        let cancel = CancellationToken::new();
        let state = Arc::new(std::sync::atomic::AtomicU8::new(state_to_code(RequestState::Validated)));
        self.active.insert(id.clone(), ActiveRequest { cancel: cancel.clone(), state: state.clone() });

        let (tx, rx) = tokio::sync::mpsc::channel::<String>(64);

        let pool = self.pool.clone();
        let queue = self.queue.clone();
        let dispatcher = self.dispatcher.clone();
        let gcp_ops = self.gcp_ops.clone();
        let active = self.active.clone();
        let req_id = id.clone();
        let model = request.model.clone();
        let body_value = request.body.clone();
        let streaming = request.streaming;
        let output_style = request.dialect.output_style();
        let identifier = request.identifier.clone();

        tokio::spawn(async move {
            run_request(
                req_id.clone(),
                target.family,
                model,
                body_value,
                streaming,
                output_style,
                identifier,
                pool,
                queue,
                dispatcher,
                gcp_ops,
                cancel,
                state,
                tx,
            )
            .await;
            active.remove(&req_id);
        });

        Ok((id, ReceiverStream::new(rx).boxed()))
    }

    fn abort(&self, id: &RequestId) -> bool {
        match self.active.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn state(&self, id: &RequestId) -> Option<RequestState> {
        self.active.get(id).map(|e| code_to_state(e.state.load(Ordering::Acquire)))
    }

    fn abort_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active.iter() {
            entry.cancel.cancel();
            count += 1;
        }
        count
    }

    fn load(&self) -> usize {
        self.queue.load()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_request(
    id: RequestId,
    family: ModelFamily,
    model: String,
    body: serde_json::Value,
    streaming: bool,
    output_style: OutputStyle,
    identifier: Identifier,
    pool: Arc<KeyPool>,
    queue: Arc<RequestQueue>,
    dispatcher: Arc<dyn Dispatcher>,
    gcp_ops: Arc<GcpOps>,
    cancel: CancellationToken,
    state: Arc<std::sync::atomic::AtomicU8>,
    tx: tokio::sync::mpsc::Sender<String>,
) {
    let mut retry_count = 0u32;
    loop {
        state.store(state_to_code(RequestState::Enqueued), Ordering::Release);
        let Ok((_queue_id, waiter)) = queue.enqueue(family, identifier.clone(), retry_count) else {
            let _ = tx.send(write_fatal(output_style, "too many queued requests for this client")).await;
            state.store(state_to_code(RequestState::FatalFailure), Ordering::Release);
            return;
        };

        if let Some(estimate) = queue.wait_estimate(family) {
            let _ = tx.send(format!(": queued, estimated wait {}ms\n\n", estimate.as_millis())).await;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = waiter => {
                match outcome {
                    Ok(DequeueOutcome::Proceed) => {}
                    Ok(DequeueOutcome::Stalled) | Err(_) => {
                        let _ = tx.send(write_fatal(output_style, "timed out waiting in queue")).await;
                        state.store(state_to_code(RequestState::FatalFailure), Ordering::Release);
                        return;
                    }
                }
            }
        }

        state.store(state_to_code(RequestState::Dispatching), Ordering::Release);
        let target = RouteTarget { service: family.service(), family };
        let key = match pool.get(target) {
            Ok(k) => k,
            Err(e) => {
                if retry_count < MAX_RETRIES {
                    retry_count += 1;
                    continue;
                }
                let _ = tx.send(write_fatal(output_style, &e.to_string())).await;
                state.store(state_to_code(RequestState::FatalFailure), Ordering::Release);
                return;
            }
        };

        let body_bytes = match serde_json::to_vec(&body) {
            Ok(b) => b,
            Err(e) => {
                let _ = tx.send(write_fatal(output_style, &e.to_string())).await;
                state.store(state_to_code(RequestState::FatalFailure), Ordering::Release);
                return;
            }
        };

        let signed = match build_signed_request(&key, family, &model, body_bytes, streaming, &gcp_ops).await {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.send(write_fatal(output_style, &e.to_string())).await;
                state.store(state_to_code(RequestState::FatalFailure), Ordering::Release);
                return;
            }
        };

        let response = match dispatcher.dispatch(signed).await {
            Ok(r) => r,
            Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                state.store(state_to_code(RequestState::RetryableFailure), Ordering::Release);
                retry_count += 1;
                continue;
            }
            Err(e) => {
                let _ = tx.send(write_fatal(output_style, &e.to_string())).await;
                state.store(state_to_code(RequestState::FatalFailure), Ordering::Release);
                return;
            }
        };

        if !(200..300).contains(&response.status) {
            let status = response.status;
            let headers = response.headers.clone();
            let mut body_stream = response.body;
            let mut body_bytes = Vec::new();
            while let Some(chunk) = body_stream.next().await {
                if let Ok(bytes) = chunk {
                    body_bytes.extend_from_slice(&bytes);
                }
            }
            let body_text = String::from_utf8_lossy(&body_bytes).into_owned();
            let failure = classify_http_error(status, &body_text);

            let should_retry = match &failure {
                CheckFailure::Revoked => {
                    pool.disable(family.service(), &key.fingerprint, relay_core::DisableReason::Revoked);
                    false
                }
                CheckFailure::OverQuota => {
                    pool.disable(family.service(), &key.fingerprint, relay_core::DisableReason::Quota);
                    false
                }
                CheckFailure::RateLimited { retry_in } => {
                    let lockout = if family.service() == relay_core::Service::OpenAi {
                        openai_reset_lockout(&headers).unwrap_or(*retry_in)
                    } else {
                        *retry_in
                    };
                    pool.mark_rate_limited(family.service(), &key.fingerprint, lockout);
                    true
                }
                CheckFailure::TokensRateLimited => true,
                CheckFailure::Network | CheckFailure::Unexpected(_) => (500..600).contains(&status),
            };

            if should_retry && retry_count < MAX_RETRIES {
                state.store(state_to_code(RequestState::RetryableFailure), Ordering::Release);
                retry_count += 1;
                continue;
            }

            let message = match &failure {
                CheckFailure::Unexpected(msg) => msg.clone(),
                other => format!("{other:?}"),
            };
            let _ = tx.send(write_fatal(output_style, &message)).await;
            state.store(state_to_code(RequestState::FatalFailure), Ordering::Release);
            return;
        }

        state.store(state_to_code(RequestState::Streaming), Ordering::Release);
        let usage_bytes = if family.service() == relay_core::Service::Aws {
            stream_aws_response(response, output_style, cancel.clone(), tx.clone()).await
        } else {
            stream_response(response, input_format_for(family.service()), output_style, cancel.clone(), tx.clone()).await
        };
        pool.increment_usage(family.service(), &key.fingerprint, family, usage_bytes);
        state.store(state_to_code(RequestState::Success), Ordering::Release);
        return;
    }
}

/// OpenAI's `x-ratelimit-reset-{requests,tokens}` headers give a tighter
/// lockout estimate than the generic 429 classification; the shorter of the
/// two dimensions applies, capped so a malformed header can't lock a key out
/// indefinitely.
fn openai_reset_lockout(headers: &HashMap<String, String>) -> Option<Duration> {
    const CAP: Duration = Duration::from_secs(20);
    let requests_ms = headers.get("x-ratelimit-reset-requests").map(|v| parse_reset_header(v));
    let tokens_ms = headers.get("x-ratelimit-reset-tokens").map(|v| parse_reset_header(v));
    let ms = match (requests_ms, tokens_ms) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }?;
    Some(Duration::from_millis(ms).min(CAP))
}

/// Which per-frame rewrite rule applies to a given upstream's native wire
/// shape, independent of which dialect the client itself is speaking.
fn input_format_for(service: relay_core::Service) -> relay_stream::InputFormat {
    use relay_core::Service;
    use relay_stream::{AnthropicVersion, InputFormat};
    match service {
        Service::OpenAi | Service::Mistral => InputFormat::OpenAiChat,
        Service::Anthropic => InputFormat::Anthropic { version: AnthropicVersion::V1 },
        Service::Aws | Service::Gcp => InputFormat::Anthropic { version: AnthropicVersion::V2 },
        Service::Azure => InputFormat::Azure,
        Service::GoogleAi => InputFormat::GoogleAi,
    }
}

/// Streams a text-SSE upstream response through the adapter/transformer
/// pipeline. Returns the total content-delta byte count as a token-usage
/// proxy: no upstream exposes a parsed token count on the streaming path, so
/// the pool's per-key usage bookkeeping is driven off bytes instead.
async fn stream_response(
    response: crate::dispatch::DispatchResponse,
    format: relay_stream::InputFormat,
    output_style: OutputStyle,
    cancel: CancellationToken,
    tx: tokio::sync::mpsc::Sender<String>,
) -> u64 {
    let mut adapter = SseTextAdapter::new();
    let mut transformer = Transformer::new(format);
    let mut body = response.body;
    let mut usage_bytes = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return usage_bytes,
            chunk = body.next() => {
                let Some(chunk) = chunk else { break };
                let Ok(bytes) = chunk else { break };
                for frame in adapter.push(&bytes) {
                    for event in transformer.transform(&frame) {
                        if let CanonicalEvent::ContentDelta { ref delta, .. } = event {
                            usage_bytes += delta.len() as u64;
                        }
                        let written = match output_style {
                            OutputStyle::OpenAiChunk => relay_stream::write_openai_chunk(&event),
                            OutputStyle::AnthropicChunk => relay_stream::write_anthropic_chunk(&event),
                        };
                        if let Some(frame) = written {
                            if tx.send(frame).await.is_err() {
                                return usage_bytes;
                            }
                        }
                    }
                }
            }
        }
    }
    usage_bytes
}

/// Streams an AWS Bedrock response through the binary eventstream decoder
/// instead of the text-SSE adapter: Bedrock's `invoke-with-response-stream`
/// body is `application/vnd.amazon.eventstream` framing, not demarshaled SSE.
/// Each decoded chunk's JSON carries its Anthropic event name in a `type`
/// field rather than a separate `event:` line, so that field is threaded
/// into `RawFrame.event` to keep reusing the v2 transform rule unchanged.
async fn stream_aws_response(
    response: crate::dispatch::DispatchResponse,
    output_style: OutputStyle,
    cancel: CancellationToken,
    tx: tokio::sync::mpsc::Sender<String>,
) -> u64 {
    use relay_stream::{AwsEventStreamDecoder, AwsFrameOutcome, RawFrame};

    let mut decoder = AwsEventStreamDecoder::new();
    let mut transformer = Transformer::new(input_format_for(relay_core::Service::Aws));
    let mut body = response.body;
    let mut usage_bytes = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return usage_bytes,
            chunk = body.next() => {
                let Some(chunk) = chunk else { break };
                let Ok(bytes) = chunk else { break };
                let Ok(messages) = decoder.push(&bytes) else { break };
                for message in &messages {
                    match AwsEventStreamDecoder::classify(message) {
                        AwsFrameOutcome::Chunk(payload) => {
                            let text = String::from_utf8_lossy(&payload).into_owned();
                            let event = serde_json::from_str::<serde_json::Value>(&text)
                                .ok()
                                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
                            let frame = RawFrame { event, data: text };
                            for canonical in transformer.transform(&frame) {
                                if let CanonicalEvent::ContentDelta { ref delta, .. } = canonical {
                                    usage_bytes += delta.len() as u64;
                                }
                                let written = match output_style {
                                    OutputStyle::OpenAiChunk => relay_stream::write_openai_chunk(&canonical),
                                    OutputStyle::AnthropicChunk => relay_stream::write_anthropic_chunk(&canonical),
                                };
                                if let Some(frame) = written {
                                    if tx.send(frame).await.is_err() {
                                        return usage_bytes;
                                    }
                                }
                            }
                        }
                        AwsFrameOutcome::Retryable(reason) | AwsFrameOutcome::Fatal(reason) => {
                            let _ = tx.send(write_fatal(output_style, &reason)).await;
                            return usage_bytes;
                        }
                    }
                }
            }
        }
    }
    usage_bytes
}

fn write_fatal(output_style: OutputStyle, message: &str) -> String {
    let event = relay_core::CanonicalEvent::Error { spoofed_text: message.to_string() };
    match output_style {
        OutputStyle::OpenAiChunk => relay_stream::write_openai_chunk(&event),
        OutputStyle::AnthropicChunk => relay_stream::write_anthropic_chunk(&event),
    }
    .unwrap_or_default()
}
