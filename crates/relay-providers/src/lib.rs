//! Per-service `KeyProvider` implementations. Everything that generalizes
//! across providers (selection ordering, lockout math, checker scheduling)
//! lives once on [`generic_provider::GenericProvider`]; each module here
//! supplies only the provider-specific [`service_ops::ServiceOps`] seam.

pub mod anthropic;
pub mod aws;
pub mod azure;
pub mod classify;
pub mod gcp;
pub mod generic_provider;
pub mod google_ai;
pub mod mistral;
pub mod mock;
pub mod openai;
pub mod pozzed;
pub mod reset_header;
pub mod service_ops;
pub mod sigv4;

pub use anthropic::AnthropicOps;
pub use aws::AwsOps;
pub use azure::AzureOps;
pub use classify::{classify_http_error, CheckFailure};
pub use gcp::GcpOps;
pub use generic_provider::GenericProvider;
pub use google_ai::GoogleAiOps;
pub use mistral::MistralOps;
pub use openai::OpenAiOps;
pub use reset_header::parse_reset_header;
pub use service_ops::{CheckSuccess, OrgClone, ServiceOps};
