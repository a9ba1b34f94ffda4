use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;

use relay_core::{
    DisableReason, Fingerprint, GatewayError, KeyProvider, KeyRecord, KeySummary, KeyUpdate,
    ModelFamily, Service,
};

use crate::classify::CheckFailure;
use crate::service_ops::{OrgClone, ServiceOps};

/// Up to this many unchecked keys are probed concurrently per initial-burst
/// tick (§4.2).
const BURST_CONCURRENCY: usize = 12;
const BURST_TICK: Duration = Duration::from_millis(250);
/// ±25% jitter applied to the recurring check period.
const JITTER_FRACTION: f64 = 0.25;

/// One `KeyProvider` per service, parameterized over the provider-specific
/// bits (`ServiceOps`). Owns the key list and implements every operation in
/// §4.1 (selection policy, lockout aggregation) and §4.2 (checker scheduling)
/// generically so each provider module only supplies `test_key` and a
/// handful of tuning knobs.
pub struct GenericProvider<O: ServiceOps> {
    ops: O,
    keys: RwLock<Vec<Arc<KeyRecord>>>,
}

impl<O: ServiceOps> GenericProvider<O> {
    pub fn new(ops: O, keys: Vec<Arc<KeyRecord>>) -> Self {
        Self { ops, keys: RwLock::new(keys) }
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    fn find(&self, fp: &Fingerprint) -> Option<Arc<KeyRecord>> {
        self.keys.read().iter().find(|k| &k.fingerprint == fp).cloned()
    }

    fn candidates(&self, family: ModelFamily) -> Vec<Arc<KeyRecord>> {
        self.keys
            .read()
            .iter()
            .filter(|k| {
                k.is_selectable()
                    && k.with_state(|s| s.model_families.contains(&family) && self.ops.candidate_ok(s, family))
            })
            .cloned()
            .collect()
    }

    /// Probe a single key and apply the result. Returns any org clones
    /// discovered so the caller can add them to the key list (keys can't add
    /// siblings to themselves while read-locked for iteration).
    async fn check_one(&self, key: &Arc<KeyRecord>, now: DateTime<Utc>) -> Vec<OrgClone> {
        if key.with_state(|s| s.disabled) {
            key.with_state_mut(|s| s.last_checked = Some(now));
            return Vec::new();
        }
        match self.ops.test_key(key).await {
            Ok(success) => {
                key.mark_checked(success.families, now);
                key.with_state_mut(|s| s.next_check_at = None);
                success.org_clones
            }
            Err(failure) => {
                self.apply_failure(key, failure, now);
                Vec::new()
            }
        }
    }

    fn apply_failure(&self, key: &Arc<KeyRecord>, failure: CheckFailure, now: DateTime<Utc>) {
        match failure {
            CheckFailure::Revoked => {
                tracing::warn!(fingerprint = %key.fingerprint, service = ?self.ops.service(), "key revoked");
                key.apply_update(&KeyUpdate {
                    disabled: Some(true),
                    revoked: Some(true),
                    last_checked: Some(now),
                    ..Default::default()
                });
            }
            CheckFailure::OverQuota => {
                tracing::warn!(fingerprint = %key.fingerprint, service = ?self.ops.service(), "key over quota");
                key.apply_update(&KeyUpdate {
                    disabled: Some(true),
                    over_quota: Some(true),
                    last_checked: Some(now),
                    ..Default::default()
                });
            }
            CheckFailure::RateLimited { retry_in } => {
                let retry_in = chrono::Duration::from_std(retry_in).unwrap_or(chrono::Duration::seconds(12));
                key.apply_update(&KeyUpdate {
                    last_checked: Some(now),
                    next_check_at: Some(now + retry_in),
                    ..Default::default()
                });
            }
            CheckFailure::TokensRateLimited => {
                key.apply_update(&KeyUpdate { last_checked: Some(now), ..Default::default() });
            }
            CheckFailure::Network => {
                key.apply_update(&KeyUpdate {
                    last_checked: Some(now),
                    next_check_at: Some(now + chrono::Duration::seconds(60)),
                    ..Default::default()
                });
            }
            CheckFailure::Unexpected(msg) => {
                tracing::warn!(fingerprint = %key.fingerprint, service = ?self.ops.service(), error = %msg, "unclassified check error");
                key.apply_update(&KeyUpdate { last_checked: Some(now), ..Default::default() });
            }
        }
    }

    fn add_org_clone(&self, clone: OrgClone) {
        let key = Arc::new(KeyRecord::new_org_clone(
            clone.secret,
            self.ops.service(),
            &clone.org_id,
            clone.provider_state,
        ));
        self.keys.write().push(key);
    }

    /// Runs the initial-burst check over every key that has never been
    /// checked, `BURST_CONCURRENCY` at a time, pausing `BURST_TICK` between
    /// batches until none remain (§4.2).
    pub async fn run_initial_burst(&self) {
        loop {
            let pending: Vec<Arc<KeyRecord>> =
                self.keys.read().iter().filter(|k| !k.has_been_checked()).cloned().collect();
            if pending.is_empty() {
                break;
            }
            let batch: Vec<_> = pending.into_iter().take(BURST_CONCURRENCY).collect();
            let now = Utc::now();
            let clone_batches = futures::future::join_all(batch.iter().map(|k| self.check_one(k, now))).await;
            for clones in clone_batches {
                for c in clones {
                    self.add_org_clone(c);
                }
            }
            if self.keys.read().iter().any(|k| !k.has_been_checked()) {
                tokio::time::sleep(BURST_TICK).await;
            }
        }
    }

    /// The oldest-checked enabled key whose effective due time has passed,
    /// per §4.2's `max(oldestLastChecked + KEY_CHECK_PERIOD, lastCheck +
    /// MIN_CHECK_INTERVAL)` schedule (a failure's `next_check_at` can pull
    /// the due time earlier).
    fn due_key(&self, now: DateTime<Utc>) -> Option<Arc<KeyRecord>> {
        let period = chrono::Duration::from_std(self.ops.check_period()).ok()?;
        let min_interval = chrono::Duration::from_std(self.ops.min_check_interval()).ok()?;
        self.keys
            .read()
            .iter()
            .filter(|k| k.has_been_checked() && !k.with_state(|s| s.disabled))
            .filter_map(|k| {
                let (last_checked, override_at) = k.with_state(|s| (s.last_checked?, s.next_check_at));
                let jittered_period = jittered(period);
                let base_due = (last_checked + jittered_period).max(last_checked + min_interval);
                let due = match override_at {
                    Some(o) => o.min(base_due),
                    None => base_due,
                };
                Some((due, k.clone()))
            })
            .filter(|(due, _)| *due <= now)
            .min_by_key(|(due, _)| *due)
            .map(|(_, k)| k)
    }

    /// Background recurring-check loop. A no-op for providers that disable
    /// recurring checks (Azure/OpenAI/Mistral); runs until `cancel` fires.
    pub async fn run_recheck_loop(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        if !self.ops.recheck_enabled() {
            return;
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.ops.min_check_interval()) => {}
            }
            let now = Utc::now();
            if let Some(key) = self.due_key(now) {
                let clones = self.check_one(&key, now).await;
                for c in clones {
                    self.add_org_clone(c);
                }
            }
        }
    }
}

fn jittered(period: chrono::Duration) -> chrono::Duration {
    let millis = period.num_milliseconds() as f64;
    let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    chrono::Duration::milliseconds((millis * (1.0 + jitter)) as i64)
}

#[async_trait]
impl<O: ServiceOps> KeyProvider for GenericProvider<O> {
    fn service(&self) -> Service {
        self.ops.service()
    }

    async fn init(&self) -> Result<(), GatewayError> {
        self.run_initial_burst().await;
        Ok(())
    }

    fn list(&self) -> Vec<KeySummary> {
        self.keys.read().iter().map(|k| k.summary()).collect()
    }

    fn get(&self, family: ModelFamily) -> Result<Arc<KeyRecord>, GatewayError> {
        let now = Utc::now();
        let mut candidates = self.candidates(family);
        if candidates.is_empty() {
            return Err(GatewayError::NoKeyAvailable { service: self.ops.service() });
        }

        candidates.sort_by(|a, b| {
            let (a_until, a_rl_at, a_last_used) =
                a.with_state(|s| (s.rate_limited_until, s.rate_limited_at, s.last_used));
            let (b_until, b_rl_at, b_last_used) =
                b.with_state(|s| (s.rate_limited_until, s.rate_limited_at, s.last_used));
            let a_limited = a_until.map(|u| u > now).unwrap_or(false);
            let b_limited = b_until.map(|u| u > now).unwrap_or(false);

            a_limited
                .cmp(&b_limited)
                .then_with(|| a_rl_at.cmp(&b_rl_at))
                .then_with(|| {
                    let a_pri = a.with_state(|s| self.ops.secondary_priority(s, family));
                    let b_pri = b.with_state(|s| self.ops.secondary_priority(s, family));
                    a_pri.cmp(&b_pri)
                })
                .then_with(|| a_last_used.cmp(&b_last_used))
        });

        let chosen = candidates.remove(0);
        let reuse_delay = chrono::Duration::from_std(self.ops.reuse_delay()).unwrap_or(chrono::Duration::zero());
        chosen.mark_selected(now, reuse_delay);
        Ok(chosen)
    }

    fn disable(&self, fp: &Fingerprint, reason: DisableReason) {
        let Some(key) = self.find(fp) else { return };
        let update = match reason {
            DisableReason::Quota => KeyUpdate { disabled: Some(true), over_quota: Some(true), ..Default::default() },
            DisableReason::Revoked => KeyUpdate { disabled: Some(true), revoked: Some(true), ..Default::default() },
        };
        key.apply_update(&update);
    }

    fn update(&self, fp: &Fingerprint, partial: KeyUpdate) {
        if let Some(key) = self.find(fp) {
            key.apply_update(&partial);
        }
    }

    fn available(&self) -> usize {
        self.keys.read().iter().filter(|k| k.with_state(|s| !s.disabled)).count()
    }

    fn increment_usage(&self, fp: &Fingerprint, family: ModelFamily, tokens: u64) {
        if let Some(key) = self.find(fp) {
            key.increment_prompt_count();
            key.increment_family_tokens(family, tokens);
        }
    }

    fn get_lockout_period(&self, family: ModelFamily) -> Duration {
        let now = Utc::now();
        let candidates = self.candidates(family);
        if candidates.is_empty() {
            return Duration::ZERO;
        }
        let any_free = candidates
            .iter()
            .any(|k| k.with_state(|s| s.rate_limited_until.map(|u| u <= now).unwrap_or(true)));
        if any_free {
            return Duration::ZERO;
        }
        let min_until = candidates
            .iter()
            .filter_map(|k| k.with_state(|s| s.rate_limited_until))
            .min()
            .expect("non-empty candidates all carry a future rate_limited_until");
        let wait = (min_until - now).to_std().unwrap_or(Duration::ZERO);
        wait.min(Duration::from_secs(20))
    }

    fn mark_rate_limited(&self, fp: &Fingerprint, lockout: Duration) {
        let Some(key) = self.find(fp) else { return };
        let now = Utc::now();
        let until = now + chrono::Duration::from_std(lockout).unwrap_or(chrono::Duration::seconds(3));
        key.apply_update(&KeyUpdate {
            rate_limited_at: Some(now),
            rate_limited_until: Some(until),
            ..Default::default()
        });
    }

    async fn recheck(&self) -> Result<(), GatewayError> {
        let now = Utc::now();
        let keys: Vec<_> = self.keys.read().iter().cloned().collect();
        for key in &keys {
            let clones = self.check_one(key, now).await;
            for c in clones {
                self.add_org_clone(c);
            }
        }
        Ok(())
    }
}
