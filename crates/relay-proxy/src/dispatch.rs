//! Abstracts the actual outbound HTTP call behind a small trait (§4.7) so
//! orchestrator tests can exercise request handling without opening a real
//! upstream connection.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use relay_core::{GatewayError, SignedRequest};

/// A dispatched response: a status code plus a byte stream of the body.
/// Non-streaming upstream calls still arrive this way, as a stream that
/// yields exactly once before ending. Header names are lowercased so lookups
/// (e.g. OpenAI's `x-ratelimit-reset-*`) don't have to guess at casing.
pub struct DispatchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: BoxStream<'static, Result<Bytes, GatewayError>>,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: SignedRequest) -> Result<DispatchResponse, GatewayError>;
}

pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, request: SignedRequest) -> Result<DispatchResponse, GatewayError> {
        use futures::StreamExt;

        let mut builder = self.client.request(
            request.method.parse().expect("method is a fixed literal"),
            &request.url,
        );
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let resp = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamTransient {
                service: service_hint_from_url(&request.url),
                status: None,
                message: e.to_string(),
                retry_after: None,
            })?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GatewayError::ProxyInternal(e.to_string())))
            .boxed();

        Ok(DispatchResponse { status, headers, body: stream })
    }
}

/// Best-effort service classification for a transport-level failure, used
/// only to populate `GatewayError::UpstreamTransient`'s `service` field when
/// the call never reached the point of knowing which key was in play.
fn service_hint_from_url(url: &str) -> relay_core::Service {
    if url.contains("openai.azure.com") {
        relay_core::Service::Azure
    } else if url.contains("api.openai.com") {
        relay_core::Service::OpenAi
    } else if url.contains("api.anthropic.com") {
        relay_core::Service::Anthropic
    } else if url.contains("generativelanguage.googleapis.com") {
        relay_core::Service::GoogleAi
    } else if url.contains("api.mistral.ai") {
        relay_core::Service::Mistral
    } else if url.contains("bedrock") {
        relay_core::Service::Aws
    } else {
        relay_core::Service::Gcp
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::Arc;

    use futures::stream;
    use parking_lot::Mutex;

    use super::*;

    /// Scripted dispatcher for orchestrator tests: replays one `Result` per
    /// call, in order.
    pub struct MockDispatcher {
        scripted: Mutex<Vec<Result<(u16, Vec<Bytes>), GatewayError>>>,
        seen: Mutex<Vec<SignedRequest>>,
    }

    impl MockDispatcher {
        pub fn new(outcomes: Vec<Result<(u16, Vec<Bytes>), GatewayError>>) -> Self {
            Self { scripted: Mutex::new(outcomes), seen: Mutex::new(Vec::new()) }
        }

        pub fn requests_seen(&self) -> Vec<SignedRequest> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl Dispatcher for MockDispatcher {
        async fn dispatch(&self, request: SignedRequest) -> Result<DispatchResponse, GatewayError> {
            self.seen.lock().push(request);
            let outcome = {
                let mut scripted = self.scripted.lock();
                if scripted.is_empty() {
                    return Err(GatewayError::ProxyInternal("mock dispatcher exhausted".into()));
                }
                scripted.remove(0)
            };
            let (status, chunks) = outcome?;
            let body = stream::iter(chunks.into_iter().map(Ok)).boxed();
            Ok(DispatchResponse { status, headers: HashMap::new(), body })
        }
    }

    pub fn arc(outcomes: Vec<Result<(u16, Vec<Bytes>), GatewayError>>) -> Arc<MockDispatcher> {
        Arc::new(MockDispatcher::new(outcomes))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::mock::MockDispatcher;
    use super::*;

    #[tokio::test]
    async fn mock_dispatcher_replays_scripted_outcomes_in_order() {
        let dispatcher = MockDispatcher::new(vec![Ok((200, vec![Bytes::from_static(b"a")]))]);
        let resp = dispatcher.dispatch(SignedRequest::post("https://x", vec![])).await.unwrap();
        assert_eq!(resp.status, 200);
        let chunks: Vec<_> = resp.body.collect().await;
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn mock_dispatcher_records_every_request_it_saw() {
        let dispatcher = MockDispatcher::new(vec![Ok((200, vec![]))]);
        let _ = dispatcher.dispatch(SignedRequest::post("https://x/path", vec![])).await.unwrap();
        assert_eq!(dispatcher.requests_seen().len(), 1);
        assert_eq!(dispatcher.requests_seen()[0].url, "https://x/path");
    }
}
