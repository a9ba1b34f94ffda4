use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::ids::Fingerprint;
use crate::key::{KeyRecord, KeySummary, KeyUpdate};
use crate::model::{ModelFamily, Service};

/// One instance per service. Implementations own their key list and all
/// provider-specific selection/checking logic; everything above this trait
/// (the pool, the queue, the orchestrator) deals only in these operations.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    fn service(&self) -> Service;

    /// Load keys from configuration and perform the initial check burst.
    async fn init(&self) -> Result<(), GatewayError>;

    /// Redacted snapshot of every key this provider holds.
    fn list(&self) -> Vec<KeySummary>;

    /// Selection policy per the family's candidate set; see module docs on
    /// `relay-providers` for the ordering rules.
    fn get(&self, family: ModelFamily) -> Result<Arc<KeyRecord>, GatewayError>;

    fn disable(&self, fp: &Fingerprint, reason: DisableReason);

    fn update(&self, fp: &Fingerprint, partial: KeyUpdate);

    /// Count of enabled keys across all families.
    fn available(&self) -> usize;

    fn increment_usage(&self, fp: &Fingerprint, family: ModelFamily, tokens: u64);

    /// Shortest time until any enabled key for `family` becomes usable, or
    /// `Duration::ZERO` if one already is (or none exist at all).
    fn get_lockout_period(&self, family: ModelFamily) -> Duration;

    fn mark_rate_limited(&self, fp: &Fingerprint, lockout: Duration);

    /// Force a recheck pass outside the checker's normal schedule.
    async fn recheck(&self) -> Result<(), GatewayError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisableReason {
    Quota,
    Revoked,
}
