//! Demarshals upstream provider bytes into discrete SSE-shaped frames (the
//! "SSE Adapter", §4.5) and translates those frames into the canonical
//! chat-completion-chunk event the client ultimately sees (the "SSE
//! Transformer", §4.6), plus a companion aggregator that rebuilds a
//! materialized non-streaming body from the canonical stream (§4.6).

pub mod adapter;
pub mod aggregator;
pub mod aws_eventstream;
pub mod json_array;
pub mod transformer;
pub mod writer;

pub use adapter::{RawFrame, SseTextAdapter};
pub use aggregator::{Aggregator, AggregatorDialect};
pub use aws_eventstream::{AwsEventMessage, AwsEventStreamDecoder, AwsFrameOutcome, FramingError};
pub use json_array::JsonArrayStreamParser;
pub use transformer::{AnthropicVersion, InputFormat, Transformer};
pub use writer::{write_anthropic_chunk, write_openai_chunk};
