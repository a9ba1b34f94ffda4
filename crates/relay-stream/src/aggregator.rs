//! Rebuilds a materialized, non-streaming response body from the canonical
//! event stream (§4.6): the proxy always demarshals and transforms upstream
//! bytes through the same pipeline, then either forwards the canonical
//! stream as SSE or, for a non-streaming request, accumulates it here and
//! serializes the dialect-appropriate single-shot body.

use relay_core::CanonicalEvent;
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregatorDialect {
    OpenAiChat,
    OpenAiText,
    AnthropicText,
    AnthropicChat,
}

#[derive(Default)]
pub struct Aggregator {
    dialect: Option<AggregatorDialect>,
    content: String,
    finish_reason: Option<String>,
}

impl Aggregator {
    pub fn new(dialect: AggregatorDialect) -> Self {
        Self { dialect: Some(dialect), ..Self::default() }
    }

    pub fn observe(&mut self, event: &CanonicalEvent) {
        if let CanonicalEvent::ContentDelta { delta, finish_reason } = event {
            self.content.push_str(delta);
            if let Some(reason) = finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }
    }

    pub fn materialize(&self) -> Value {
        match self.dialect.expect("Aggregator constructed via Default without a dialect") {
            AggregatorDialect::OpenAiChat => json!({
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": self.content},
                    "finish_reason": self.finish_reason,
                }],
            }),
            AggregatorDialect::OpenAiText => json!({
                "choices": [{
                    "index": 0,
                    "text": self.content,
                    "finish_reason": self.finish_reason,
                }],
            }),
            AggregatorDialect::AnthropicText => json!({
                "completion": self.content,
                "stop_reason": self.finish_reason,
            }),
            AggregatorDialect::AnthropicChat => json!({
                "content": [{"type": "text", "text": self.content}],
                "stop_reason": self.finish_reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(s: &str) -> CanonicalEvent {
        CanonicalEvent::ContentDelta { delta: s.to_string(), finish_reason: None }
    }

    #[test]
    fn accumulates_content_across_deltas() {
        let mut agg = Aggregator::new(AggregatorDialect::OpenAiChat);
        agg.observe(&CanonicalEvent::RoleAssignment);
        agg.observe(&delta("Hello"));
        agg.observe(&delta(", world"));
        agg.observe(&CanonicalEvent::ContentDelta { delta: String::new(), finish_reason: Some("stop".into()) });
        let body = agg.materialize();
        assert_eq!(body["choices"][0]["message"]["content"], "Hello, world");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn non_content_events_are_ignored() {
        let mut agg = Aggregator::new(AggregatorDialect::AnthropicText);
        agg.observe(&CanonicalEvent::OriginalMessage { raw: Value::Null });
        agg.observe(&CanonicalEvent::Done);
        let body = agg.materialize();
        assert_eq!(body["completion"], "");
    }

    #[test]
    fn anthropic_chat_wraps_content_in_a_text_block() {
        let mut agg = Aggregator::new(AggregatorDialect::AnthropicChat);
        agg.observe(&delta("hi there"));
        let body = agg.materialize();
        assert_eq!(body["content"][0]["text"], "hi there");
        assert_eq!(body["content"][0]["type"], "text");
    }

    #[test]
    fn openai_text_dialect_uses_a_text_field_not_message() {
        let mut agg = Aggregator::new(AggregatorDialect::OpenAiText);
        agg.observe(&delta("completion text"));
        let body = agg.materialize();
        assert_eq!(body["choices"][0]["text"], "completion text");
        assert!(body["choices"][0].get("message").is_none());
    }
}
