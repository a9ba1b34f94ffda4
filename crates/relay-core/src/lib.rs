pub mod config;
pub mod errors;
pub mod ids;
pub mod key;
pub mod model;
pub mod provider;
pub mod signed_request;
pub mod stream_event;

pub use config::Config;
pub use errors::GatewayError;
pub use ids::{Fingerprint, RequestId};
pub use key::{AwsLoggingStatus, KeyRecord, KeyState, KeySummary, KeyUpdate, ProviderState};
pub use model::{model_family_for, service_for_model_name, ModelFamily, Service};
pub use provider::{DisableReason, KeyProvider};
pub use signed_request::SignedRequest;
pub use stream_event::{CanonicalEvent, ChatCompletionChunk, ChunkChoice, ChunkDelta};
