//! The pool's periodic OpenAI recheck cron (§4.3): OpenAI disables the
//! checker's normal recurring-check loop (it can't cheaply re-verify a key
//! without burning a completion), so the pool instead forces a full
//! `recheck()` pass on a fixed period. The first fire is offset by a hash of
//! the host name so a fleet of identical deployments doesn't all probe
//! OpenAI in the same instant.

use std::sync::Arc;
use std::time::Duration;

use relay_core::KeyProvider;
use sha2::{Digest, Sha256};

/// §4.3: "rotates through OpenAI keys every 8 hours".
const RECHECK_PERIOD: Duration = Duration::from_secs(8 * 60 * 60);

fn host_offset(period: Duration) -> Duration {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
    let digest = Sha256::digest(host.as_bytes());
    let hash = u64::from_be_bytes(digest[..8].try_into().expect("sha256 digest is at least 8 bytes"));
    Duration::from_millis(hash % period.as_millis() as u64)
}

/// Runs until `cancel` fires. Call with the OpenAI provider specifically;
/// every other service rechecks through its own `KeyChecker` loop.
pub async fn run_openai_recheck_cron(
    provider: Arc<dyn KeyProvider>,
    cancel: tokio_util::sync::CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(host_offset(RECHECK_PERIOD)) => {}
    }
    loop {
        if let Err(err) = provider.recheck().await {
            tracing::warn!(error = %err, "openai recheck cron pass failed");
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECHECK_PERIOD) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_offset_is_within_the_period() {
        let period = Duration::from_secs(8 * 60 * 60);
        let offset = host_offset(period);
        assert!(offset < period);
    }

    #[test]
    fn host_offset_is_deterministic_for_a_fixed_hostname() {
        std::env::set_var("HOSTNAME", "relay-node-1");
        let a = host_offset(RECHECK_PERIOD);
        let b = host_offset(RECHECK_PERIOD);
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn cron_stops_immediately_when_cancelled_up_front() {
        use relay_providers::mock::{ready_keys, MockOps};
        use relay_providers::GenericProvider;
        use std::collections::HashSet;

        let keys = ready_keys(relay_core::Service::OpenAi, &[relay_core::ModelFamily::Turbo], 1);
        let ops = MockOps::new(relay_core::Service::OpenAi, [relay_core::ModelFamily::Turbo].into_iter().collect::<HashSet<_>>());
        let provider: Arc<dyn KeyProvider> = Arc::new(GenericProvider::new(ops, keys));
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_millis(50), run_openai_recheck_cron(provider, cancel))
            .await
            .expect("cron should return immediately once cancelled");
    }
}
