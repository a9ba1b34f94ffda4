//! A deterministic in-memory `ServiceOps`/`KeyProvider` for downstream tests
//! (relay-pool, relay-queue, relay-proxy), modeled on the example's
//! `tron_llm::mock::MockProvider`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::{KeyRecord, ModelFamily, Service};

use crate::classify::CheckFailure;
use crate::service_ops::{CheckSuccess, ServiceOps};

/// A scripted sequence of check outcomes, consumed in order; once exhausted,
/// every further probe reports the family set given at construction.
pub struct MockOps {
    service: Service,
    steady_state: HashSet<ModelFamily>,
    scripted: Mutex<Vec<Result<HashSet<ModelFamily>, CheckFailure>>>,
    calls: AtomicUsize,
    period: Duration,
}

impl MockOps {
    pub fn new(service: Service, steady_state: HashSet<ModelFamily>) -> Self {
        Self {
            service,
            steady_state,
            scripted: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            period: Duration::from_secs(60 * 60),
        }
    }

    pub fn with_script(mut self, outcomes: Vec<Result<HashSet<ModelFamily>, CheckFailure>>) -> Self {
        self.scripted = Mutex::new(outcomes);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceOps for MockOps {
    fn service(&self) -> Service {
        self.service
    }

    fn check_period(&self) -> Duration {
        self.period
    }

    async fn test_key(&self, _key: &KeyRecord) -> Result<CheckSuccess, CheckFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripted = self.scripted.lock();
        if scripted.is_empty() {
            return Ok(CheckSuccess::families(self.steady_state.clone()));
        }
        scripted.remove(0).map(CheckSuccess::families)
    }
}

/// Builds an `n`-key mock `KeyRecord` pool for a given service/family set,
/// all pre-marked ready without needing an `init()` pass.
pub fn ready_keys(service: Service, families: &[ModelFamily], count: usize) -> Vec<std::sync::Arc<KeyRecord>> {
    (0..count)
        .map(|i| {
            let provider_state = match service {
                Service::OpenAi => relay_core::ProviderState::OpenAi {
                    org_id: None,
                    trial: false,
                    has_32k_access: false,
                    reset_requests_ms: None,
                    reset_tokens_ms: None,
                },
                Service::Anthropic => relay_core::ProviderState::Anthropic { requires_preamble: false },
                Service::GoogleAi => relay_core::ProviderState::GoogleAi,
                Service::Mistral => relay_core::ProviderState::Mistral,
                Service::Aws => relay_core::ProviderState::Aws {
                    region: "us-east-1".into(),
                    logging_status: relay_core::AwsLoggingStatus::Disabled,
                },
                Service::Azure => {
                    relay_core::ProviderState::Azure { resource: "res".into(), deployment: "dep".into() }
                }
                Service::Gcp => relay_core::ProviderState::Gcp {
                    project_id: "proj".into(),
                    region: "us-central1".into(),
                    client_email: "svc@proj.iam.gserviceaccount.com".into(),
                },
            };
            let key = KeyRecord::new(
                secrecy::SecretString::from(format!("mock-secret-{i}")),
                service,
                provider_state,
            );
            key.mark_checked(families.iter().copied().collect(), chrono::Utc::now());
            std::sync::Arc::new(key)
        })
        .collect()
}
