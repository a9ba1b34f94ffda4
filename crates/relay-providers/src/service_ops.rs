use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use relay_core::{KeyRecord, KeyState, ModelFamily, ProviderState, Service};

use crate::classify::CheckFailure;

/// A key discovered by the checker to belong to a non-default organization.
/// OpenAI is the only service that clones keys this way (§4.2).
pub struct OrgClone {
    pub org_id: String,
    pub secret: SecretString,
    pub provider_state: ProviderState,
}

/// Result of a successful probe: the family set the key can reach, plus any
/// organization clones discovered along the way.
pub struct CheckSuccess {
    pub families: HashSet<ModelFamily>,
    pub org_clones: Vec<OrgClone>,
}

impl CheckSuccess {
    pub fn families(families: HashSet<ModelFamily>) -> Self {
        Self { families, org_clones: Vec::new() }
    }
}

/// Per-service specialization point consumed by `GenericProvider`. Everything
/// that generalizes across providers (selection ordering, lockout math, the
/// checker's burst/recurring scheduling) lives on `GenericProvider`; this
/// trait carries only what's genuinely provider-specific (§4.1, §4.2).
#[async_trait]
pub trait ServiceOps: Send + Sync + 'static {
    fn service(&self) -> Service;

    /// Azure, OpenAI, and Mistral can't cheaply re-check after the initial
    /// burst; they disable recurring checks and rely on dispatch-path errors
    /// to notice a key going bad.
    fn recheck_enabled(&self) -> bool {
        true
    }

    fn check_period(&self) -> Duration;

    fn min_check_interval(&self) -> Duration {
        Duration::from_secs(3)
    }

    /// REUSE_DELAY: the post-selection throttle window (§4.1 step 4).
    fn reuse_delay(&self) -> Duration {
        Duration::from_millis(750)
    }

    /// Default lockout applied by `markRateLimited` absent a provider-parsed
    /// reset hint (OpenAI overrides this via its reset headers).
    fn lockout_duration(&self) -> Duration {
        Duration::from_secs(3)
    }

    /// Extra per-service predicate beyond "not disabled, family present"
    /// (AWS logging status, GCP per-model enablement, OpenAI dated-snapshot
    /// visibility).
    fn candidate_ok(&self, _state: &KeyState, _family: ModelFamily) -> bool {
        true
    }

    /// Lower sorts first among otherwise tied-on-rate-limit candidates
    /// (OpenAI trial preference, 32k conservation; Anthropic/GCP non-pozzed
    /// preference). Default: no secondary preference.
    fn secondary_priority(&self, _state: &KeyState, _family: ModelFamily) -> u8 {
        0
    }

    /// Provider-specific initial/recurring probe. `Ok` reports the family set
    /// the key can reach (and any org clones found); `Err` carries a
    /// classified failure for the generic checker to apply.
    async fn test_key(&self, key: &KeyRecord) -> Result<CheckSuccess, CheckFailure>;
}
