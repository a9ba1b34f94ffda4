use serde::Serialize;

/// Canonical chat-completion-chunk event: the OpenAI-shaped common denominator
/// every upstream dialect is translated into before reaching the client.
///
/// State-machine contract: `RoleAssignment` is always first, followed by zero
/// or more `ContentDelta`/`OriginalMessage` in any interleaving, terminated by
/// exactly one of `Done` or `Error`.
#[derive(Clone, Debug)]
pub enum CanonicalEvent {
    RoleAssignment,
    ContentDelta { delta: String, finish_reason: Option<String> },
    /// Side-channel carrying the untranslated upstream frame, for observers
    /// (e.g. an aggregator rebuilding a materialized response body).
    OriginalMessage { raw: serde_json::Value },
    Done,
    Error { spoofed_text: String },
}

impl CanonicalEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Wire shape of a `ContentDelta` when serialized into an OpenAI-dialect
/// `data: <json>` frame.
#[derive(Serialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

#[derive(Serialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
    pub index: u32,
}

#[derive(Serialize, Default)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(CanonicalEvent::Done.is_terminal());
        assert!(CanonicalEvent::Error { spoofed_text: "x".into() }.is_terminal());
        assert!(!CanonicalEvent::RoleAssignment.is_terminal());
        assert!(
            !CanonicalEvent::ContentDelta { delta: "hi".into(), finish_reason: None }
                .is_terminal()
        );
    }
}
