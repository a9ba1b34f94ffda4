//! Translates a decoded upstream frame into zero or more canonical events
//! (§4.6). One `Transformer` is constructed per in-flight stream and carries
//! whatever state its dialect needs across frames (Anthropic v1's cumulative
//! completion offset, Google AI's first-event prefix strip).

use relay_core::CanonicalEvent;
use serde_json::Value;

use crate::adapter::RawFrame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnthropicVersion {
    V1,
    V2,
}

/// Upstream wire shape driving which per-frame rewrite rule applies. GCP
/// delivers Claude's native (v2-shaped) JSON once the SSE Adapter has
/// demarshaled its text framing. AWS Bedrock also carries v2-shaped JSON but
/// over binary `application/vnd.amazon.eventstream` framing, decoded by
/// `AwsEventStreamDecoder` rather than the SSE Adapter; both still route
/// through `Anthropic { version: V2 }` once their frames are in `RawFrame`
/// shape, rather than getting dedicated variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputFormat {
    OpenAiChat,
    OpenAiText,
    Anthropic { version: AnthropicVersion },
    Azure,
    GoogleAi,
}

pub struct Transformer {
    format: InputFormat,
    emitted_role: bool,
    anthropic_completion_len: usize,
    google_first_event: bool,
}

impl Transformer {
    pub fn new(format: InputFormat) -> Self {
        Self {
            format,
            emitted_role: false,
            anthropic_completion_len: 0,
            google_first_event: true,
        }
    }

    /// Transforms one upstream frame. Synthesizes the leading
    /// `RoleAssignment` on first call and an `OriginalMessage` side-channel
    /// event per frame, ahead of whatever dialect-specific deltas fall out.
    pub fn transform(&mut self, frame: &RawFrame) -> Vec<CanonicalEvent> {
        if frame.data.trim() == "[DONE]" {
            return vec![CanonicalEvent::Done];
        }

        let mut out = Vec::new();
        if !self.emitted_role {
            out.push(CanonicalEvent::RoleAssignment);
            self.emitted_role = true;
        }

        let value: Value = serde_json::from_str(&frame.data).unwrap_or(Value::Null);
        out.push(CanonicalEvent::OriginalMessage { raw: value.clone() });

        match self.format {
            InputFormat::OpenAiChat => transform_openai_chat(&value, &mut out),
            InputFormat::OpenAiText => transform_openai_text(&value, &mut out),
            InputFormat::Anthropic { version: AnthropicVersion::V1 } => {
                self.transform_anthropic_v1(&value, &mut out)
            }
            InputFormat::Anthropic { version: AnthropicVersion::V2 } => {
                transform_anthropic_v2(frame.event.as_deref(), &value, &mut out)
            }
            InputFormat::Azure => transform_azure(&value, &mut out),
            InputFormat::GoogleAi => self.transform_google_ai(&value, &mut out),
        }
        out
    }

    fn transform_anthropic_v1(&mut self, value: &Value, out: &mut Vec<CanonicalEvent>) {
        let completion = value.get("completion").and_then(Value::as_str).unwrap_or_default();
        let delta = if completion.len() >= self.anthropic_completion_len {
            completion[self.anthropic_completion_len..].to_string()
        } else {
            // Completion shrank: upstream misbehaved. Emit it whole rather
            // than panic on an out-of-bounds slice.
            completion.to_string()
        };
        self.anthropic_completion_len = completion.len();
        let stop_reason = value.get("stop_reason").and_then(Value::as_str).map(str::to_string);
        if !delta.is_empty() || stop_reason.is_some() {
            out.push(CanonicalEvent::ContentDelta { delta, finish_reason: stop_reason });
        }
    }

    fn transform_google_ai(&mut self, value: &Value, out: &mut Vec<CanonicalEvent>) {
        let candidate = value.get("candidates").and_then(|c| c.get(0));
        let mut text = candidate
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect::<String>()
            })
            .unwrap_or_default();

        if self.google_first_event {
            if let Some(stripped) = text.strip_prefix("Speaker: ") {
                text = stripped.to_string();
            }
            self.google_first_event = false;
        }

        let finish_reason =
            candidate.and_then(|c| c.get("finishReason")).and_then(Value::as_str).map(str::to_string);
        if !text.is_empty() || finish_reason.is_some() {
            out.push(CanonicalEvent::ContentDelta { delta: text, finish_reason });
        }
    }
}

fn transform_openai_chat(value: &Value, out: &mut Vec<CanonicalEvent>) {
    let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else { return };
    let delta_text = choice.get("delta").and_then(|d| d.get("content")).and_then(Value::as_str);
    let finish_reason = choice.get("finish_reason").and_then(Value::as_str).map(str::to_string);
    if delta_text.is_some() || finish_reason.is_some() {
        out.push(CanonicalEvent::ContentDelta {
            delta: delta_text.unwrap_or_default().to_string(),
            finish_reason,
        });
    }
}

fn transform_openai_text(value: &Value, out: &mut Vec<CanonicalEvent>) {
    let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else { return };
    let text = choice.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
    let finish_reason = choice.get("finish_reason").and_then(Value::as_str).map(str::to_string);
    if !text.is_empty() || finish_reason.is_some() {
        out.push(CanonicalEvent::ContentDelta { delta: text, finish_reason });
    }
}

fn transform_anthropic_v2(event: Option<&str>, value: &Value, out: &mut Vec<CanonicalEvent>) {
    match event {
        Some("ping") => {}
        Some("message_stop") => {
            out.push(CanonicalEvent::ContentDelta { delta: String::new(), finish_reason: Some("stop".into()) });
        }
        _ => {
            let Some(delta) = value.get("delta") else { return };
            if let Some(text) = delta.get("text").and_then(Value::as_str) {
                out.push(CanonicalEvent::ContentDelta { delta: text.to_string(), finish_reason: None });
            }
            if let Some(stop_reason) = delta.get("stop_reason").and_then(Value::as_str) {
                out.push(CanonicalEvent::ContentDelta {
                    delta: String::new(),
                    finish_reason: Some(stop_reason.to_string()),
                });
            }
        }
    }
}

/// Drops Azure's leading `prompt_filter_results`-only chunk (a precursor
/// carrying content-filter metadata, no `choices[].delta`) before falling
/// back to the plain chat rewrite.
fn transform_azure(value: &Value, out: &mut Vec<CanonicalEvent>) {
    let has_choices = value.get("choices").and_then(Value::as_array).map(|a| !a.is_empty()).unwrap_or(false);
    if !has_choices && value.get("prompt_filter_results").is_some() {
        return;
    }
    transform_openai_chat(value, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: Option<&str>, data: &str) -> RawFrame {
        RawFrame { event: event.map(str::to_string), data: data.to_string() }
    }

    #[test]
    fn first_frame_always_synthesizes_role_assignment() {
        let mut t = Transformer::new(InputFormat::OpenAiChat);
        let events = t.transform(&frame(None, r#"{"choices":[{"delta":{"content":"hi"}}]}"#));
        assert!(matches!(events[0], CanonicalEvent::RoleAssignment));
        let events = t.transform(&frame(None, r#"{"choices":[{"delta":{"content":"!"}}]}"#));
        assert!(!matches!(events[0], CanonicalEvent::RoleAssignment));
    }

    #[test]
    fn done_sentinel_short_circuits_everything() {
        let mut t = Transformer::new(InputFormat::OpenAiChat);
        let events = t.transform(&frame(None, "[DONE]"));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CanonicalEvent::Done));
    }

    #[test]
    fn openai_text_rewrites_text_field_into_content_delta() {
        let mut t = Transformer::new(InputFormat::OpenAiText);
        let events = t.transform(&frame(None, r#"{"choices":[{"text":"hello","finish_reason":null}]}"#));
        let delta = events.iter().find_map(|e| match e {
            CanonicalEvent::ContentDelta { delta, .. } => Some(delta.clone()),
            _ => None,
        });
        assert_eq!(delta.as_deref(), Some("hello"));
    }

    #[test]
    fn anthropic_v1_slices_the_cumulative_completion() {
        let mut t = Transformer::new(InputFormat::Anthropic { version: AnthropicVersion::V1 });
        let e1 = t.transform(&frame(None, r#"{"completion":"Hello"}"#));
        let e2 = t.transform(&frame(None, r#"{"completion":"Hello, world"}"#));

        let delta_of = |events: &[CanonicalEvent]| {
            events
                .iter()
                .find_map(|e| match e {
                    CanonicalEvent::ContentDelta { delta, .. } => Some(delta.clone()),
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(delta_of(&e1), "Hello");
        assert_eq!(delta_of(&e2), ", world");
    }

    #[test]
    fn anthropic_v2_suppresses_ping_events() {
        let mut t = Transformer::new(InputFormat::Anthropic { version: AnthropicVersion::V2 });
        let events = t.transform(&frame(Some("ping"), "{}"));
        assert!(!events.iter().any(|e| matches!(e, CanonicalEvent::ContentDelta { .. })));
    }

    #[test]
    fn anthropic_v2_emits_direct_deltas() {
        let mut t = Transformer::new(InputFormat::Anthropic { version: AnthropicVersion::V2 });
        let events = t.transform(&frame(
            Some("content_block_delta"),
            r#"{"delta":{"text":"hi"}}"#,
        ));
        let delta = events.iter().find_map(|e| match e {
            CanonicalEvent::ContentDelta { delta, .. } => Some(delta.clone()),
            _ => None,
        });
        assert_eq!(delta.as_deref(), Some("hi"));
    }

    #[test]
    fn azure_drops_the_prompt_filter_precursor_chunk() {
        let mut t = Transformer::new(InputFormat::Azure);
        let events = t.transform(&frame(None, r#"{"choices":[],"prompt_filter_results":[{"index":0}]}"#));
        assert!(!events.iter().any(|e| matches!(e, CanonicalEvent::ContentDelta { .. })));
    }

    #[test]
    fn google_ai_concatenates_parts_and_strips_speaker_prefix_once() {
        let mut t = Transformer::new(InputFormat::GoogleAi);
        let events = t.transform(&frame(
            None,
            r#"{"candidates":[{"content":{"parts":[{"text":"Speaker: "},{"text":"hello"}]}}]}"#,
        ));
        let delta = events.iter().find_map(|e| match e {
            CanonicalEvent::ContentDelta { delta, .. } => Some(delta.clone()),
            _ => None,
        });
        assert_eq!(delta.as_deref(), Some("hello"));

        let events2 = t.transform(&frame(
            None,
            r#"{"candidates":[{"content":{"parts":[{"text":"Speaker: more"}]}}]}"#,
        ));
        let delta2 = events2.iter().find_map(|e| match e {
            CanonicalEvent::ContentDelta { delta, .. } => Some(delta.clone()),
            _ => None,
        });
        assert_eq!(delta2.as_deref(), Some("Speaker: more"));
    }
}
