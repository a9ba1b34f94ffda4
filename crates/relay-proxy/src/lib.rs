//! HTTP edge and request-servicing pipeline for the gateway: resolves a
//! client-facing dialect, queues and dispatches the upstream call, and runs
//! the response through the `relay-stream` adapter/transformer/writer chain.

pub mod client_dialect;
pub mod dispatch;
pub mod orchestrator;
pub mod preprocess;
pub mod server;

pub use client_dialect::{ClientDialect, OutputStyle};
pub use dispatch::{Dispatcher, DispatchResponse, HttpDispatcher};
pub use orchestrator::{GatewayOrchestrator, ProxyOrchestrator, ProxyRequest, RequestState};
pub use preprocess::build_signed_request;
pub use server::{start, AppState, ServerConfig, ServerHandle};
