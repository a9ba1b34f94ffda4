//! Re-serializes canonical events into the SSE framing the client actually
//! receives (§6's "Canonical SSE framing emitted to the client"): plain
//! `data: <json>\n\n` for an OpenAI-shaped caller, `event: <type>` plus
//! `data: <json>\n\n` for an Anthropic-shaped one. `OriginalMessage` is a
//! side channel and never reaches the client directly.

use relay_core::{CanonicalEvent, ChatCompletionChunk, ChunkChoice, ChunkDelta};
use serde_json::json;

pub fn write_openai_chunk(event: &CanonicalEvent) -> Option<String> {
    match event {
        CanonicalEvent::RoleAssignment => Some(frame(&ChatCompletionChunk {
            choices: vec![ChunkChoice {
                delta: ChunkDelta { role: Some("assistant".to_string()), content: None },
                finish_reason: None,
                index: 0,
            }],
        })),
        CanonicalEvent::ContentDelta { delta, finish_reason } => Some(frame(&ChatCompletionChunk {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    role: None,
                    content: if delta.is_empty() { None } else { Some(delta.clone()) },
                },
                finish_reason: finish_reason.clone(),
                index: 0,
            }],
        })),
        CanonicalEvent::Done => Some("data: [DONE]\n\n".to_string()),
        CanonicalEvent::Error { spoofed_text } => Some(format!(
            "{}data: [DONE]\n\n",
            frame(&ChatCompletionChunk {
                choices: vec![ChunkChoice {
                    delta: ChunkDelta { role: None, content: Some(spoofed_text.clone()) },
                    finish_reason: Some("stop".to_string()),
                    index: 0,
                }],
            })
        )),
        CanonicalEvent::OriginalMessage { .. } => None,
    }
}

fn frame(chunk: &ChatCompletionChunk) -> String {
    format!("data: {}\n\n", serde_json::to_string(chunk).expect("chunk always serializes"))
}

pub fn write_anthropic_chunk(event: &CanonicalEvent) -> Option<String> {
    match event {
        CanonicalEvent::RoleAssignment => Some(sse(
            "message_start",
            &json!({"type": "message_start", "message": {"role": "assistant"}}),
        )),
        CanonicalEvent::ContentDelta { delta, finish_reason } => match finish_reason {
            Some(reason) => Some(sse(
                "message_delta",
                &json!({"type": "message_delta", "delta": {"stop_reason": reason}}),
            )),
            None => Some(sse(
                "content_block_delta",
                &json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": delta}}),
            )),
        },
        CanonicalEvent::Done => Some(sse("message_stop", &json!({"type": "message_stop"}))),
        CanonicalEvent::Error { spoofed_text } => {
            Some(sse("error", &json!({"type": "error", "error": {"message": spoofed_text}})))
        }
        CanonicalEvent::OriginalMessage { .. } => None,
    }
}

fn sse(event_type: &str, data: &serde_json::Value) -> String {
    format!("event: {event_type}\ndata: {data}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_role_assignment_sets_the_role_field() {
        let frame = write_openai_chunk(&CanonicalEvent::RoleAssignment).unwrap();
        assert!(frame.contains("\"role\":\"assistant\""));
    }

    #[test]
    fn openai_content_delta_carries_content() {
        let frame = write_openai_chunk(&CanonicalEvent::ContentDelta {
            delta: "hi".into(),
            finish_reason: None,
        })
        .unwrap();
        assert!(frame.contains("\"content\":\"hi\""));
    }

    #[test]
    fn openai_done_emits_the_done_sentinel() {
        assert_eq!(write_openai_chunk(&CanonicalEvent::Done).unwrap(), "data: [DONE]\n\n");
    }

    #[test]
    fn openai_original_message_is_not_forwarded() {
        assert!(write_openai_chunk(&CanonicalEvent::OriginalMessage { raw: serde_json::Value::Null }).is_none());
    }

    #[test]
    fn anthropic_chunks_carry_an_event_line() {
        let frame = write_anthropic_chunk(&CanonicalEvent::ContentDelta {
            delta: "hi".into(),
            finish_reason: None,
        })
        .unwrap();
        assert!(frame.starts_with("event: content_block_delta\n"));
    }

    #[test]
    fn anthropic_finish_reason_becomes_a_message_delta() {
        let frame = write_anthropic_chunk(&CanonicalEvent::ContentDelta {
            delta: String::new(),
            finish_reason: Some("stop".into()),
        })
        .unwrap();
        assert!(frame.starts_with("event: message_delta\n"));
        assert!(frame.contains("stop_reason"));
    }
}
