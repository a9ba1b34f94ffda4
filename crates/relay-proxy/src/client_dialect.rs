//! The `<dialect>` segment of `POST /proxy/<dialect>/*rest` (§6) names which
//! vendor schema the client is speaking. It both hints the model resolver at
//! an otherwise-ambiguous service and selects which SSE wire shape the
//! response gets rewritten into.

use futures::stream::BoxStream;
use futures::StreamExt;
use relay_core::Service;
use relay_stream::{Aggregator, AggregatorDialect};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientDialect {
    OpenAi,
    Anthropic,
    Azure,
    Aws,
    Gcp,
    GoogleAi,
    Mistral,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStyle {
    OpenAiChunk,
    AnthropicChunk,
}

impl ClientDialect {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "azure" => Some(Self::Azure),
            "aws" | "bedrock" => Some(Self::Aws),
            "gcp" | "vertex" => Some(Self::Gcp),
            "google-ai" | "googleai" => Some(Self::GoogleAi),
            "mistral" => Some(Self::Mistral),
            _ => None,
        }
    }

    /// Disambiguates the service for dialects whose model names collide
    /// with another service's (GCP's `claude-*` aliases vs. plain
    /// Anthropic/AWS names).
    pub fn service_hint(&self) -> Option<Service> {
        match self {
            Self::OpenAi => Some(Service::OpenAi),
            Self::Anthropic => Some(Service::Anthropic),
            Self::Azure => Some(Service::Azure),
            Self::Aws => Some(Service::Aws),
            Self::Gcp => Some(Service::Gcp),
            Self::GoogleAi => Some(Service::GoogleAi),
            Self::Mistral => Some(Service::Mistral),
        }
    }

    /// Wire shape the client receives back, regardless of which service
    /// actually served the request (e.g. a GCP-routed Claude completion
    /// still comes back Anthropic-shaped to an `anthropic`/`gcp`/`aws`
    /// caller).
    pub fn output_style(&self) -> OutputStyle {
        match self {
            Self::Anthropic | Self::Aws | Self::Gcp => OutputStyle::AnthropicChunk,
            Self::OpenAi | Self::Azure | Self::GoogleAi | Self::Mistral => OutputStyle::OpenAiChunk,
        }
    }
}

impl ClientDialect {
    fn aggregator_dialect(&self) -> AggregatorDialect {
        match self.output_style() {
            OutputStyle::OpenAiChunk => AggregatorDialect::OpenAiChat,
            OutputStyle::AnthropicChunk => AggregatorDialect::AnthropicChat,
        }
    }
}

/// Re-derives a materialized, non-streaming body from the wire-level chunk
/// frames the orchestrator already wrote, for a client request that didn't
/// ask for `stream: true`. The orchestrator always runs requests through the
/// streaming pipeline; this re-parses those frames back into deltas rather
/// than threading a second non-streaming path through the dispatch loop.
pub async fn aggregate_wire_chunks(dialect: ClientDialect, mut frames: BoxStream<'static, String>) -> serde_json::Value {
    let mut aggregator = Aggregator::new(dialect.aggregator_dialect());
    while let Some(frame) = frames.next().await {
        for event in wire_frame_to_deltas(&frame) {
            aggregator.observe(&event);
        }
    }
    aggregator.materialize()
}

fn wire_frame_to_deltas(frame: &str) -> Vec<relay_core::CanonicalEvent> {
    let Some(data_line) = frame.lines().find(|l| l.starts_with("data: ")) else { return Vec::new() };
    let data = &data_line["data: ".len()..];
    if data.trim() == "[DONE]" {
        return Vec::new();
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else { return Vec::new() };

    if let Some(choice) = value.get("choices").and_then(|c| c.get(0)) {
        let content = choice.get("delta").and_then(|d| d.get("content")).and_then(|v| v.as_str());
        let finish_reason = choice.get("finish_reason").and_then(|v| v.as_str()).map(str::to_string);
        if content.is_some() || finish_reason.is_some() {
            return vec![relay_core::CanonicalEvent::ContentDelta {
                delta: content.unwrap_or_default().to_string(),
                finish_reason,
            }];
        }
    }

    let anthropic_type = value.get("type").and_then(|v| v.as_str());
    match anthropic_type {
        Some("content_block_delta") => {
            let text = value.get("delta").and_then(|d| d.get("text")).and_then(|v| v.as_str()).unwrap_or_default();
            vec![relay_core::CanonicalEvent::ContentDelta { delta: text.to_string(), finish_reason: None }]
        }
        Some("message_delta") => {
            let reason = value.get("delta").and_then(|d| d.get("stop_reason")).and_then(|v| v.as_str()).map(str::to_string);
            vec![relay_core::CanonicalEvent::ContentDelta { delta: String::new(), finish_reason: reason }]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_dialect() {
        for raw in ["openai", "anthropic", "azure", "aws", "gcp", "google-ai", "mistral"] {
            assert!(ClientDialect::parse(raw).is_some(), "{raw} should parse");
        }
    }

    #[test]
    fn rejects_unknown_dialects() {
        assert!(ClientDialect::parse("not-a-vendor").is_none());
    }

    #[test]
    fn claude_backed_dialects_use_anthropic_chunk_framing() {
        assert_eq!(ClientDialect::Aws.output_style(), OutputStyle::AnthropicChunk);
        assert_eq!(ClientDialect::Gcp.output_style(), OutputStyle::AnthropicChunk);
    }

    #[test]
    fn openai_compatible_dialects_use_openai_chunk_framing() {
        assert_eq!(ClientDialect::Azure.output_style(), OutputStyle::OpenAiChunk);
        assert_eq!(ClientDialect::Mistral.output_style(), OutputStyle::OpenAiChunk);
    }
}
