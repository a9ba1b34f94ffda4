use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::ids::Fingerprint;
use crate::model::{ModelFamily, Service};

/// Per-provider sub-state that doesn't generalize across services.
#[derive(Clone, Debug)]
pub enum ProviderState {
    OpenAi {
        org_id: Option<String>,
        trial: bool,
        has_32k_access: bool,
        reset_requests_ms: Option<u64>,
        reset_tokens_ms: Option<u64>,
    },
    Anthropic {
        requires_preamble: bool,
    },
    GoogleAi,
    Mistral,
    Aws {
        region: String,
        logging_status: AwsLoggingStatus,
    },
    Azure {
        resource: String,
        deployment: String,
    },
    Gcp {
        project_id: String,
        region: String,
        client_email: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AwsLoggingStatus {
    Enabled,
    Disabled,
    Unknown,
}

/// Mutable fields of a key record, guarded by a single lock so checker and
/// dispatch-path writers serialize on the same key without blocking other keys.
#[derive(Clone, Debug)]
pub struct KeyState {
    pub model_families: HashSet<ModelFamily>,
    pub disabled: bool,
    pub revoked: bool,
    pub over_quota: bool,
    pub trial: Option<bool>,
    pub pozzed: Option<bool>,
    pub per_family_tokens: HashMap<ModelFamily, u64>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub rate_limited_at: Option<DateTime<Utc>>,
    pub rate_limited_until: Option<DateTime<Utc>>,
    pub provider_state: ProviderState,
    /// Checker-requested override for the next scheduled recheck, used when a
    /// classified failure wants a shorter retry window than the provider's
    /// normal period (e.g. a transient 429 during the initial burst).
    pub next_check_at: Option<DateTime<Utc>>,
}

impl KeyState {
    pub fn new(provider_state: ProviderState) -> Self {
        Self {
            model_families: HashSet::new(),
            disabled: false,
            revoked: false,
            over_quota: false,
            trial: None,
            pozzed: None,
            per_family_tokens: HashMap::new(),
            last_used: None,
            last_checked: None,
            rate_limited_at: None,
            rate_limited_until: None,
            provider_state,
            next_check_at: None,
        }
    }

    /// True if `rateLimitedUntil` is still in the future relative to `now`.
    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.rate_limited_until.map(|until| until > now).unwrap_or(false)
    }
}

/// A partial update applied atomically to a key's mutable state. Only `Some`
/// fields are written; the dyn-compatible stand-in for `update(fp, partial)`.
#[derive(Default, Clone, Debug)]
pub struct KeyUpdate {
    pub disabled: Option<bool>,
    pub revoked: Option<bool>,
    pub over_quota: Option<bool>,
    pub trial: Option<bool>,
    pub pozzed: Option<bool>,
    pub model_families: Option<HashSet<ModelFamily>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub rate_limited_at: Option<DateTime<Utc>>,
    pub rate_limited_until: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,
}

/// A single credential record. The secret is never reachable except through
/// `expose_secret`, which dispatch/signing code calls right before use.
pub struct KeyRecord {
    pub fingerprint: Fingerprint,
    pub service: Service,
    secret: SecretString,
    prompt_count: AtomicU64,
    ready: AtomicBool,
    state: parking_lot::Mutex<KeyState>,
}

impl KeyRecord {
    pub fn new(secret: SecretString, service: Service, provider_state: ProviderState) -> Self {
        let fingerprint = Fingerprint::of_secret(secret.expose_secret());
        Self {
            fingerprint,
            service,
            secret,
            prompt_count: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            state: parking_lot::Mutex::new(KeyState::new(provider_state)),
        }
    }

    pub fn new_org_clone(
        secret: SecretString,
        service: Service,
        org_id: &str,
        provider_state: ProviderState,
    ) -> Self {
        let fingerprint = Fingerprint::of_secret_with_org(secret.expose_secret(), org_id);
        Self {
            fingerprint,
            service,
            secret,
            prompt_count: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            state: parking_lot::Mutex::new(KeyState::new(provider_state)),
        }
    }

    /// Exposes the raw secret. Callers must not log or serialize the result;
    /// use only to build an outbound authorization header or signing input.
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&KeyState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut KeyState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn is_selectable(&self) -> bool {
        let st = self.state.lock();
        !st.disabled && !st.model_families.is_empty()
    }

    /// Called by the selection policy when this key is chosen: bumps
    /// `last_used` and applies the post-selection throttle in one atomic
    /// critical section (§4.1 step 4) so no second `get` can interleave
    /// between the bump and the throttle.
    pub fn mark_selected(&self, now: DateTime<Utc>, reuse_delay: chrono::Duration) {
        let mut st = self.state.lock();
        st.last_used = Some(now);
        let throttle_until = now + reuse_delay;
        st.rate_limited_until = Some(match st.rate_limited_until {
            Some(existing) => existing.max(throttle_until),
            None => throttle_until,
        });
    }

    /// A key is "ready" once it has completed at least one check; a key whose
    /// check finds zero accessible families is disabled instead of marked ready.
    pub fn mark_checked(&self, families: HashSet<ModelFamily>, now: DateTime<Utc>) {
        let mut st = self.state.lock();
        st.last_checked = Some(now);
        if families.is_empty() {
            st.disabled = true;
        } else {
            st.model_families = families;
        }
        self.ready.store(true, Ordering::Release);
    }

    pub fn has_been_checked(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn increment_prompt_count(&self) {
        self.prompt_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn prompt_count(&self) -> u64 {
        self.prompt_count.load(Ordering::Relaxed)
    }

    pub fn increment_family_tokens(&self, family: ModelFamily, tokens: u64) {
        let mut st = self.state.lock();
        *st.per_family_tokens.entry(family).or_insert(0) += tokens;
    }

    pub fn apply_update(&self, partial: &KeyUpdate) {
        let mut st = self.state.lock();
        if let Some(v) = partial.disabled {
            st.disabled = v;
        }
        if let Some(v) = partial.revoked {
            st.revoked = v;
            if v {
                st.disabled = true;
            }
        }
        if let Some(v) = partial.over_quota {
            st.over_quota = v;
        }
        if let Some(v) = partial.trial {
            st.trial = Some(v);
        }
        if let Some(v) = partial.pozzed {
            st.pozzed = Some(v);
        }
        if let Some(ref v) = partial.model_families {
            st.model_families = v.clone();
        }
        if let Some(v) = partial.last_checked {
            st.last_checked = Some(v);
        }
        if let Some(v) = partial.rate_limited_at {
            st.rate_limited_at = Some(v);
        }
        if let Some(v) = partial.rate_limited_until {
            // rateLimitedUntil >= rateLimitedAt invariant
            let at = st.rate_limited_at.unwrap_or(v);
            st.rate_limited_until = Some(v.max(at));
        }
        if let Some(v) = partial.next_check_at {
            st.next_check_at = Some(v);
        }
    }

    /// Redacted, logging/administration-safe view of this key.
    pub fn summary(&self) -> KeySummary {
        let st = self.state.lock();
        KeySummary {
            fingerprint: self.fingerprint.clone(),
            service: self.service,
            model_families: st.model_families.iter().copied().collect(),
            disabled: st.disabled,
            revoked: st.revoked,
            over_quota: st.over_quota,
            trial: st.trial,
            pozzed: st.pozzed,
            prompt_count: self.prompt_count(),
            last_used: st.last_used,
            last_checked: st.last_checked,
            rate_limited_until: st.rate_limited_until,
        }
    }
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("fingerprint", &self.fingerprint)
            .field("service", &self.service)
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// Redacted, serializable snapshot returned by `list()`. Never carries the
/// secret; this is the only shape of a key that leaves the provider for
/// logging or administration.
#[derive(Clone, Debug, serde::Serialize)]
pub struct KeySummary {
    pub fingerprint: Fingerprint,
    pub service: Service,
    pub model_families: Vec<ModelFamily>,
    pub disabled: bool,
    pub revoked: bool,
    pub over_quota: bool,
    pub trial: Option<bool>,
    pub pozzed: Option<bool>,
    pub prompt_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub rate_limited_until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_key(families: &[ModelFamily]) -> KeyRecord {
        let key = KeyRecord::new(
            SecretString::from("sk-test-secret".to_string()),
            Service::OpenAi,
            ProviderState::OpenAi {
                org_id: None,
                trial: false,
                has_32k_access: false,
                reset_requests_ms: None,
                reset_tokens_ms: None,
            },
        );
        key.mark_checked(families.iter().copied().collect(), Utc::now());
        key
    }

    #[test]
    fn fingerprint_is_derived_from_secret() {
        let key = make_key(&[ModelFamily::Turbo]);
        assert_eq!(key.fingerprint, Fingerprint::of_secret("sk-test-secret"));
    }

    #[test]
    fn org_clone_has_distinct_fingerprint() {
        let key = make_key(&[ModelFamily::Turbo]);
        let cloned = KeyRecord::new_org_clone(
            SecretString::from("sk-test-secret".to_string()),
            Service::OpenAi,
            "org-1",
            ProviderState::OpenAi {
                org_id: Some("org-1".into()),
                trial: false,
                has_32k_access: false,
                reset_requests_ms: None,
                reset_tokens_ms: None,
            },
        );
        assert_ne!(key.fingerprint, cloned.fingerprint);
    }

    #[test]
    fn zero_families_disables_key() {
        let key = make_key(&[]);
        assert!(!key.is_selectable());
    }

    #[test]
    fn nonempty_families_is_selectable() {
        let key = make_key(&[ModelFamily::Turbo]);
        assert!(key.is_selectable());
    }

    #[test]
    fn summary_never_carries_the_secret() {
        let key = make_key(&[ModelFamily::Turbo]);
        let summary = key.summary();
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("sk-test-secret"));
        let debug = format!("{key:?}");
        assert!(!debug.contains("sk-test-secret"));
    }

    #[test]
    fn revoked_implies_disabled() {
        let key = make_key(&[ModelFamily::Turbo]);
        key.apply_update(&KeyUpdate {
            revoked: Some(true),
            ..Default::default()
        });
        assert!(key.with_state(|s| s.revoked));
        assert!(key.with_state(|s| s.disabled));
    }

    #[test]
    fn rate_limited_until_never_precedes_rate_limited_at() {
        let key = make_key(&[ModelFamily::Turbo]);
        let at = Utc::now();
        key.apply_update(&KeyUpdate {
            rate_limited_at: Some(at),
            rate_limited_until: Some(at - chrono::Duration::seconds(10)),
            ..Default::default()
        });
        key.with_state(|s| {
            assert!(s.rate_limited_until.unwrap() >= s.rate_limited_at.unwrap());
        });
    }

    #[test]
    fn increment_usage_is_commutative_addition() {
        let key = make_key(&[ModelFamily::Turbo]);
        key.increment_family_tokens(ModelFamily::Turbo, 100);
        key.increment_family_tokens(ModelFamily::Turbo, 50);
        key.with_state(|s| assert_eq!(s.per_family_tokens[&ModelFamily::Turbo], 150));
    }

    #[test]
    fn mark_selected_bumps_last_used_and_throttles() {
        let key = make_key(&[ModelFamily::Turbo]);
        let now = Utc::now();
        key.mark_selected(now, chrono::Duration::milliseconds(750));
        key.with_state(|s| {
            assert_eq!(s.last_used, Some(now));
            assert!(s.rate_limited_until.unwrap() >= now + chrono::Duration::milliseconds(750));
        });
    }

    #[test]
    fn mark_selected_never_shrinks_existing_throttle() {
        let key = make_key(&[ModelFamily::Turbo]);
        let now = Utc::now();
        let far_future = now + chrono::Duration::seconds(30);
        key.apply_update(&KeyUpdate {
            rate_limited_until: Some(far_future),
            ..Default::default()
        });
        key.mark_selected(now, chrono::Duration::milliseconds(750));
        key.with_state(|s| assert_eq!(s.rate_limited_until, Some(far_future)));
    }

    #[test]
    fn has_been_checked_reflects_mark_checked() {
        let key = KeyRecord::new(
            SecretString::from("sk-unchecked".to_string()),
            Service::Anthropic,
            ProviderState::Anthropic { requires_preamble: false },
        );
        assert!(!key.has_been_checked());
        key.mark_checked([ModelFamily::Claude].into_iter().collect(), Utc::now());
        assert!(key.has_been_checked());
    }
}
