/// Initialize the process-wide tracing subscriber. Reads `RUST_LOG`, falling
/// back to `info` — the same bootstrap the bin crate's `main` always ran.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
