//! Splits a raw text/event-stream byte stream into discrete `(event, data)`
//! frames (§4.5). Upstream providers disagree on the line ending between
//! frames (`\n\n`, `\r\r`, or `\r\n\r\n`), so incoming bytes are normalized to
//! `\n` before the frame boundary is looked for.

/// One decoded `event:`/`data:` frame. Multiple `data:` lines within a frame
/// are joined with `\n`, per the SSE field-combining rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental text-SSE frame splitter. Feed it arbitrarily-chunked bytes
/// (as they arrive off the wire); it buffers a partial frame across calls.
#[derive(Default)]
pub struct SseTextAdapter {
    buf: String,
}

impl SseTextAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the internal buffer and returns every frame that
    /// became complete as a result. Leftover partial data stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        if self.buf.contains('\r') {
            self.buf = self.buf.replace("\r\n", "\n").replace('\r', "\n");
        }

        let mut frames = Vec::new();
        while let Some(idx) = self.buf.find("\n\n") {
            let frame_text: String = self.buf.drain(..idx + 2).collect();
            if let Some(frame) = parse_frame(frame_text.trim_end_matches('\n')) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_frame(text: &str) -> Option<RawFrame> {
    let mut event = None;
    let mut data_lines = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(RawFrame { event, data: data_lines.join("\n") })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_a_single_whole_frame() {
        let mut a = SseTextAdapter::new();
        let frames = a.push(b"event: completion\ndata: {\"x\":1}\n\n");
        assert_eq!(frames, vec![RawFrame { event: Some("completion".into()), data: "{\"x\":1}".into() }]);
    }

    #[test]
    fn buffers_a_partial_frame_across_pushes() {
        let mut a = SseTextAdapter::new();
        assert!(a.push(b"data: hel").is_empty());
        let frames = a.push(b"lo\n\n");
        assert_eq!(frames, vec![RawFrame { event: None, data: "hello".into() }]);
    }

    #[test]
    fn frame_boundary_is_independent_of_chunking() {
        let whole = b"data: one\n\ndata: two\n\n";
        let mut a = SseTextAdapter::new();
        let mut whole_frames = a.push(whole);

        let mut b = SseTextAdapter::new();
        let mut chunked_frames = Vec::new();
        for byte in whole {
            chunked_frames.extend(b.push(std::slice::from_ref(byte)));
        }

        whole_frames.sort_by(|x, y| x.data.cmp(&y.data));
        chunked_frames.sort_by(|x, y| x.data.cmp(&y.data));
        assert_eq!(whole_frames, chunked_frames);
    }

    #[test]
    fn normalizes_crlf_delimiters() {
        let mut a = SseTextAdapter::new();
        let frames = a.push(b"data: x\r\n\r\n");
        assert_eq!(frames, vec![RawFrame { event: None, data: "x".into() }]);
    }

    #[test]
    fn normalizes_bare_cr_delimiters() {
        let mut a = SseTextAdapter::new();
        let frames = a.push(b"data: y\r\r");
        assert_eq!(frames, vec![RawFrame { event: None, data: "y".into() }]);
    }

    #[test]
    fn joins_multiple_data_lines() {
        let mut a = SseTextAdapter::new();
        let frames = a.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn empty_keepalive_lines_are_ignored() {
        let mut a = SseTextAdapter::new();
        let frames = a.push(b"\n\ndata: real\n\n");
        assert_eq!(frames, vec![RawFrame { event: None, data: "real".into() }]);
    }
}
