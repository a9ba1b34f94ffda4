//! Decodes the `application/vnd.amazon.eventstream` binary framing AWS
//! Bedrock uses for `invoke-with-response-stream` (§4.5). Each message is a
//! length-prefixed envelope: a CRC32-checked prelude, a header block, a
//! binary payload, and a trailing CRC32 over the whole message.

use std::collections::HashMap;

use bytes::BytesMut;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("truncated eventstream message")]
    Truncated,
    #[error("eventstream prelude crc mismatch")]
    PreludeCrcMismatch,
    #[error("eventstream message crc mismatch")]
    MessageCrcMismatch,
    #[error("malformed eventstream header block")]
    MalformedHeaders,
}

#[derive(Debug, Clone)]
pub struct AwsEventMessage {
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl AwsEventMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// What a decoded message means to the caller, per §7's framing-error
/// handling: a throttling exception is retryable, everything else fatal to
/// the stream but rendered as a spoofed terminal event.
pub enum AwsFrameOutcome {
    Chunk(Vec<u8>),
    Retryable(String),
    Fatal(String),
}

/// Buffers bytes across pushes and decodes as many complete messages as are
/// available.
#[derive(Default)]
pub struct AwsEventStreamDecoder {
    buf: BytesMut,
}

impl AwsEventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<AwsEventMessage>, FramingError> {
        self.buf.extend_from_slice(chunk);
        let mut messages = Vec::new();
        loop {
            if self.buf.len() < 4 {
                break;
            }
            let total_length = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
            if self.buf.len() < total_length {
                break;
            }
            let message_bytes = self.buf.split_to(total_length);
            messages.push(decode_message(&message_bytes)?);
        }
        Ok(messages)
    }

    /// Classifies a decoded message per the `:message-type` header (§4.5:
    /// "event" chunks carry base64 payload JSON, "exception" messages signal
    /// throttling or another fatal condition).
    pub fn classify(message: &AwsEventMessage) -> AwsFrameOutcome {
        use base64::Engine as _;

        match message.header(":message-type") {
            Some("exception") => {
                let exception_type = message.header(":exception-type").unwrap_or("unknown");
                if exception_type.to_ascii_lowercase().contains("throttling") {
                    AwsFrameOutcome::Retryable(exception_type.to_string())
                } else {
                    AwsFrameOutcome::Fatal(exception_type.to_string())
                }
            }
            Some("event") => {
                #[derive(serde::Deserialize)]
                struct Envelope {
                    bytes: String,
                }
                match serde_json::from_slice::<Envelope>(&message.payload)
                    .ok()
                    .and_then(|e| base64::engine::general_purpose::STANDARD.decode(e.bytes).ok())
                {
                    Some(decoded) => AwsFrameOutcome::Chunk(decoded),
                    None => AwsFrameOutcome::Fatal("malformed event chunk payload".to_string()),
                }
            }
            other => AwsFrameOutcome::Fatal(format!("unrecognized message-type {other:?}")),
        }
    }
}

fn decode_message(bytes: &[u8]) -> Result<AwsEventMessage, FramingError> {
    if bytes.len() < 16 {
        return Err(FramingError::Truncated);
    }
    let headers_length = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let prelude_crc = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    if crc32fast::hash(&bytes[0..8]) != prelude_crc {
        return Err(FramingError::PreludeCrcMismatch);
    }

    let headers_start = 12;
    let headers_end = headers_start + headers_length;
    let payload_end = bytes.len() - 4;
    if headers_end > payload_end {
        return Err(FramingError::Truncated);
    }

    let message_crc = u32::from_be_bytes(bytes[payload_end..].try_into().unwrap());
    if crc32fast::hash(&bytes[0..payload_end]) != message_crc {
        return Err(FramingError::MessageCrcMismatch);
    }

    let headers = decode_headers(&bytes[headers_start..headers_end])?;
    let payload = bytes[headers_end..payload_end].to_vec();
    Ok(AwsEventMessage { headers, payload })
}

fn decode_headers(mut buf: &[u8]) -> Result<HashMap<String, String>, FramingError> {
    let mut headers = HashMap::new();
    while !buf.is_empty() {
        let name_len = *buf.first().ok_or(FramingError::MalformedHeaders)? as usize;
        buf = &buf[1..];
        if buf.len() < name_len + 1 {
            return Err(FramingError::MalformedHeaders);
        }
        let name = String::from_utf8_lossy(&buf[..name_len]).into_owned();
        buf = &buf[name_len..];
        let value_type = buf[0];
        buf = &buf[1..];

        let consumed = match value_type {
            0 | 1 => 0,                    // bool true/false: no payload
            2 => 1,                        // byte
            3 => 2,                        // short
            4 => 4,                        // integer
            5 => 8,                        // long
            8 => 8,                        // timestamp
            9 => 16,                       // uuid
            6 | 7 => {
                // byte_array / string: 2-byte big-endian length prefix
                if buf.len() < 2 {
                    return Err(FramingError::MalformedHeaders);
                }
                let len = u16::from_be_bytes(buf[0..2].try_into().unwrap()) as usize;
                if buf.len() < 2 + len {
                    return Err(FramingError::MalformedHeaders);
                }
                if value_type == 7 {
                    headers.insert(name.clone(), String::from_utf8_lossy(&buf[2..2 + len]).into_owned());
                }
                2 + len
            }
            _ => return Err(FramingError::MalformedHeaders),
        };
        buf = &buf[consumed..];
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_string_header(name: &str, value: &str) -> Vec<u8> {
        let mut out = vec![name.len() as u8];
        out.extend_from_slice(name.as_bytes());
        out.push(7); // string type
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn encode_message(headers: &[u8], payload: &[u8]) -> Vec<u8> {
        let headers_length = headers.len() as u32;
        let total_length = (12 + headers.len() + payload.len() + 4) as u32;
        let mut prelude = Vec::new();
        prelude.extend_from_slice(&total_length.to_be_bytes());
        prelude.extend_from_slice(&headers_length.to_be_bytes());
        let prelude_crc = crc32fast::hash(&prelude);
        let mut message = prelude;
        message.extend_from_slice(&prelude_crc.to_be_bytes());
        message.extend_from_slice(headers);
        message.extend_from_slice(payload);
        let message_crc = crc32fast::hash(&message);
        message.extend_from_slice(&message_crc.to_be_bytes());
        message
    }

    #[test]
    fn decodes_a_well_formed_chunk_message() {
        let headers = encode_string_header(":message-type", "event");
        let message = encode_message(&headers, b"{\"bytes\":\"eyJ4IjoxfQ==\"}");
        let mut decoder = AwsEventStreamDecoder::new();
        let decoded = decoder.push(&message).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].header(":message-type"), Some("event"));
        match AwsEventStreamDecoder::classify(&decoded[0]) {
            AwsFrameOutcome::Chunk(bytes) => assert_eq!(bytes, br#"{"x":1}"#),
            _ => panic!("expected a chunk"),
        }
    }

    #[test]
    fn rejects_a_corrupted_prelude_crc() {
        let headers = encode_string_header(":message-type", "event");
        let mut message = encode_message(&headers, b"{}");
        message[9] ^= 0xff;
        let mut decoder = AwsEventStreamDecoder::new();
        assert!(matches!(decoder.push(&message), Err(FramingError::PreludeCrcMismatch)));
    }

    #[test]
    fn rejects_a_corrupted_message_crc() {
        let headers = encode_string_header(":message-type", "event");
        let mut message = encode_message(&headers, b"{}");
        let last = message.len() - 1;
        message[last] ^= 0xff;
        let mut decoder = AwsEventStreamDecoder::new();
        assert!(matches!(decoder.push(&message), Err(FramingError::MessageCrcMismatch)));
    }

    #[test]
    fn buffers_a_message_split_across_pushes() {
        let headers = encode_string_header(":message-type", "event");
        let message = encode_message(&headers, b"{\"bytes\":\"e30=\"}");
        let (first, second) = message.split_at(message.len() / 2);
        let mut decoder = AwsEventStreamDecoder::new();
        assert!(decoder.push(first).unwrap().is_empty());
        let decoded = decoder.push(second).unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn classifies_throttling_exception_as_retryable() {
        let mut headers = encode_string_header(":message-type", "exception");
        headers.extend(encode_string_header(":exception-type", "ThrottlingException"));
        let message = encode_message(&headers, b"{}");
        let mut decoder = AwsEventStreamDecoder::new();
        let decoded = decoder.push(&message).unwrap();
        assert!(matches!(AwsEventStreamDecoder::classify(&decoded[0]), AwsFrameOutcome::Retryable(_)));
    }

    #[test]
    fn classifies_other_exceptions_as_fatal() {
        let mut headers = encode_string_header(":message-type", "exception");
        headers.extend(encode_string_header(":exception-type", "ValidationException"));
        let message = encode_message(&headers, b"{}");
        let mut decoder = AwsEventStreamDecoder::new();
        let decoded = decoder.push(&message).unwrap();
        assert!(matches!(AwsEventStreamDecoder::classify(&decoded[0]), AwsFrameOutcome::Fatal(_)));
    }
}
