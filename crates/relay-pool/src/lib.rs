//! Thin facade over one [`KeyProvider`] per service (§4.3). Resolves a bare
//! model name (plus an optional dialect-supplied service tag, needed to
//! discriminate GCP's `publishers/anthropic` surface from plain model-name
//! prefixes) to a `(Service, ModelFamily)` pair, then delegates every
//! per-key operation to that service's provider.

pub mod cron;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    DisableReason, Fingerprint, GatewayError, KeyProvider, KeyRecord, KeySummary, ModelFamily,
    Service,
};
use relay_telemetry::MetricsRecorder;

pub use cron::run_openai_recheck_cron;

/// Resolved routing target for an inbound request: which service and which
/// model family within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteTarget {
    pub service: Service,
    pub family: ModelFamily,
}

pub struct KeyPool {
    providers: HashMap<Service, Arc<dyn KeyProvider>>,
    metrics: Arc<MetricsRecorder>,
}

impl KeyPool {
    pub fn new(providers: HashMap<Service, Arc<dyn KeyProvider>>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { providers, metrics }
    }

    pub fn provider(&self, service: Service) -> Option<&Arc<dyn KeyProvider>> {
        self.providers.get(&service)
    }

    /// Initializes every registered provider's key list (checker initial
    /// burst) concurrently.
    pub async fn init_all(&self) -> Result<(), GatewayError> {
        futures::future::try_join_all(self.providers.values().map(|p| p.init())).await?;
        Ok(())
    }

    /// Resolves a model name to a routing target. `service_hint` disambiguates
    /// dialects that don't encode the service in the model name itself (GCP's
    /// `claude-*` aliases collide textually with AWS/Anthropic/native names;
    /// the inbound dialect tag supplies the hint in that case).
    pub fn resolve(&self, model: &str, service_hint: Option<Service>) -> Result<RouteTarget, GatewayError> {
        let service = service_hint
            .or_else(|| relay_core::service_for_model_name(model))
            .ok_or_else(|| GatewayError::ClientInvalid(format!("unrecognized model {model:?}")))?;
        let family = relay_core::model_family_for(service, model)
            .ok_or_else(|| GatewayError::ClientInvalid(format!("unrecognized model {model:?} for service {service:?}")))?;
        Ok(RouteTarget { service, family })
    }

    /// Selects a key for `target`, per the service's `KeyProvider::get`.
    pub fn get(&self, target: RouteTarget) -> Result<Arc<KeyRecord>, GatewayError> {
        let provider = self
            .providers
            .get(&target.service)
            .ok_or(GatewayError::NoKeyAvailable { service: target.service })?;
        provider.get(target.family)
    }

    pub fn disable(&self, service: Service, fp: &Fingerprint, reason: DisableReason) {
        if let Some(p) = self.providers.get(&service) {
            p.disable(fp, reason);
        }
    }

    pub fn mark_rate_limited(&self, service: Service, fp: &Fingerprint, lockout: Duration) {
        if let Some(p) = self.providers.get(&service) {
            p.mark_rate_limited(fp, lockout);
        }
    }

    pub fn increment_usage(&self, service: Service, fp: &Fingerprint, family: ModelFamily, tokens: u64) {
        if let Some(p) = self.providers.get(&service) {
            p.increment_usage(fp, family, tokens);
        }
    }

    /// Shortest wait until `family` has an available key; `None` if the
    /// service isn't configured at all (distinct from a configured service
    /// with zero enabled keys, which returns `Duration::ZERO` per §4.1 so
    /// dispatch fails loudly rather than queuing forever).
    pub fn get_lockout_period(&self, family: ModelFamily) -> Option<Duration> {
        self.providers.get(&family.service()).map(|p| p.get_lockout_period(family))
    }

    pub fn list_all(&self) -> Vec<KeySummary> {
        self.providers.values().flat_map(|p| p.list()).collect()
    }

    /// Publishes per-service availability gauges (§4.3's "aggregate
    /// metrics"); called periodically by the caller (e.g. alongside the
    /// queue's own metrics tick).
    pub fn publish_metrics(&self) {
        for (service, provider) in &self.providers {
            self.metrics.gauge_set(
                "pool.available_keys",
                &[("service", service.as_str())],
                provider.available() as f64,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use relay_providers::mock::{ready_keys, MockOps};
    use relay_providers::GenericProvider;

    use super::*;

    fn pool_with(service: Service, families: &[ModelFamily], count: usize) -> KeyPool {
        let keys = ready_keys(service, families, count);
        let ops = MockOps::new(service, families.iter().copied().collect::<HashSet<_>>());
        let provider: Arc<dyn KeyProvider> = Arc::new(GenericProvider::new(ops, keys));
        let mut providers = HashMap::new();
        providers.insert(service, provider);
        KeyPool::new(providers, Arc::new(MetricsRecorder::new()))
    }

    #[test]
    fn resolve_uses_bare_model_prefix_without_hint() {
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);
        let target = pool.resolve("gpt-3.5-turbo", None).unwrap();
        assert_eq!(target.service, Service::OpenAi);
        assert_eq!(target.family, ModelFamily::Turbo);
    }

    #[test]
    fn resolve_honors_explicit_service_hint() {
        let pool = pool_with(Service::Gcp, &[ModelFamily::GcpClaude], 1);
        let target = pool.resolve("claude-2.1", Some(Service::Gcp)).unwrap();
        assert_eq!(target.service, Service::Gcp);
        assert_eq!(target.family, ModelFamily::GcpClaude);
    }

    #[test]
    fn resolve_rejects_unknown_model() {
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);
        assert!(pool.resolve("not-a-real-model", None).is_err());
    }

    #[test]
    fn get_routes_to_the_right_provider() {
        let pool = pool_with(Service::Anthropic, &[ModelFamily::Claude], 2);
        let target = pool.resolve("claude-2.1", None).unwrap();
        let key = pool.get(target).unwrap();
        assert_eq!(key.service, Service::Anthropic);
    }

    #[test]
    fn get_fails_for_unconfigured_service() {
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);
        let err = pool.get(RouteTarget { service: Service::Anthropic, family: ModelFamily::Claude });
        assert!(matches!(err, Err(GatewayError::NoKeyAvailable { .. })));
    }

    #[test]
    fn lockout_period_none_for_unconfigured_service() {
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);
        assert_eq!(pool.get_lockout_period(ModelFamily::Claude), None);
    }

    #[test]
    fn lockout_period_zero_when_a_key_is_free() {
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);
        assert_eq!(pool.get_lockout_period(ModelFamily::Turbo), Some(Duration::ZERO));
    }

    #[test]
    fn disable_and_mark_rate_limited_route_through() {
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);
        let fp = pool.list_all()[0].fingerprint.clone();
        pool.disable(Service::OpenAi, &fp, DisableReason::Revoked);
        let summary = pool.list_all().into_iter().next().unwrap();
        assert!(summary.disabled && summary.revoked);
    }

    #[test]
    fn publish_metrics_sets_a_gauge_per_service() {
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 3);
        pool.publish_metrics();
        assert_eq!(pool.metrics.gauge_get("pool.available_keys", &[("service", "openai")]), 3.0);
    }
}
