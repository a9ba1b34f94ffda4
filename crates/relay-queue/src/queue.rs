//! The process-wide request queue, partitioned by model family (§4.4).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use relay_core::{GatewayError, ModelFamily, RequestId};
use relay_pool::KeyPool;
use tokio::sync::oneshot;

use crate::entry::{DequeueOutcome, QueueEntry};
use crate::estimator::WaitEstimator;
use crate::identifier::Identifier;

/// A request that exhausts this many retries surfaces as a terminal
/// `UpstreamTransient` failure instead of being re-enqueued again (§11).
pub const MAX_RETRIES: u32 = 3;

pub const DEQUEUE_TICK: Duration = Duration::from_millis(50);
pub const STALL_REAPER_TICK: Duration = Duration::from_secs(20);
pub const STALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const ESTIMATOR_TICK: Duration = Duration::from_secs(3);

pub struct RequestQueue {
    partitions: DashMap<ModelFamily, Mutex<VecDeque<QueueEntry>>>,
    occupancy: DashMap<String, usize>,
    estimators: DashMap<ModelFamily, Mutex<WaitEstimator>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self { partitions: DashMap::new(), occupancy: DashMap::new(), estimators: DashMap::new() }
    }

    /// Admits a request. `retry_count > 0` bypasses the occupancy cap, per
    /// §4.4's retry rule.
    pub fn enqueue(
        &self,
        family: ModelFamily,
        identifier: Identifier,
        retry_count: u32,
    ) -> Result<(RequestId, oneshot::Receiver<DequeueOutcome>), GatewayError> {
        if retry_count == 0 {
            let key = identifier.occupancy_key();
            let mut occ = self.occupancy.entry(key).or_insert(0);
            if *occ >= identifier.occupancy_limit() {
                return Err(GatewayError::ClientInvalid("too many queued requests for this client".into()));
            }
            *occ += 1;
        }

        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        let entry = QueueEntry {
            id: id.clone(),
            family,
            identifier,
            enqueue_time: Instant::now(),
            retry_count,
            notify: Some(tx),
        };
        self.partitions.entry(family).or_insert_with(|| Mutex::new(VecDeque::new())).lock().push_back(entry);
        Ok((id, rx))
    }

    /// Disconnect hook: evicts `id` from `family`'s partition if still
    /// present. Releases its occupancy slot; the dropped sender silently
    /// stops anyone who might (incorrectly) still be awaiting it.
    pub fn remove(&self, family: ModelFamily, id: &RequestId) -> bool {
        let Some(partition) = self.partitions.get(&family) else { return false };
        let mut q = partition.lock();
        let Some(pos) = q.iter().position(|e| &e.id == id) else { return false };
        let entry = q.remove(pos).expect("position just found");
        drop(q);
        self.release_occupancy(&entry);
        true
    }

    fn release_occupancy(&self, entry: &QueueEntry) {
        if entry.retry_count == 0 {
            if let Some(mut occ) = self.occupancy.get_mut(&entry.identifier.occupancy_key()) {
                *occ = occ.saturating_sub(1);
            }
        }
    }

    /// One dequeue-loop tick: for every family with a currently-available
    /// key, pops the eligible head of that family's partition and resolves
    /// its waiter.
    pub fn tick_dequeue(&self, pool: &KeyPool) {
        for partition in self.partitions.iter() {
            let family = *partition.key();
            if pool.get_lockout_period(family) != Some(Duration::ZERO) {
                continue;
            }
            let mut q = partition.value().lock();
            let Some(pos) = head_position(&q) else { continue };
            let mut entry = q.remove(pos).expect("position just found");
            drop(q);
            self.release_occupancy(&entry);
            if !entry.identifier.is_shared_ip() {
                self.estimators
                    .entry(family)
                    .or_insert_with(|| Mutex::new(WaitEstimator::new()))
                    .lock()
                    .record_completion(entry.waited());
            }
            if let Some(tx) = entry.notify.take() {
                let _ = tx.send(DequeueOutcome::Proceed);
            }
        }
    }

    /// Current estimated wait for a newly-enqueued request in `family`, fed
    /// by the ~3s recompute tick plus completed-dequeue observations.
    pub fn wait_estimate(&self, family: ModelFamily) -> Option<Duration> {
        self.estimators.get(&family)?.lock().estimate()
    }

    /// Feeds each family's estimator the current longest wait; run on
    /// [`ESTIMATOR_TICK`].
    pub fn recompute_estimates(&self) {
        for partition in self.partitions.iter() {
            let family = *partition.key();
            let longest = self.longest_waiting(family);
            self.estimators
                .entry(family)
                .or_insert_with(|| Mutex::new(WaitEstimator::new()))
                .lock()
                .observe_current_longest(longest);
        }
    }

    /// Evicts every entry that has waited at least [`STALL_TIMEOUT`],
    /// resolving each waiter with [`DequeueOutcome::Stalled`]. Returns the
    /// evicted ids for logging.
    pub fn reap_stalled(&self) -> Vec<RequestId> {
        let mut evicted = Vec::new();
        let now = Instant::now();
        for partition in self.partitions.iter() {
            let mut q = partition.value().lock();
            let mut i = 0;
            while i < q.len() {
                if now.duration_since(q[i].enqueue_time) >= STALL_TIMEOUT {
                    let mut entry = q.remove(i).expect("index in bounds");
                    self.release_occupancy(&entry);
                    evicted.push(entry.id.clone());
                    if let Some(tx) = entry.notify.take() {
                        let _ = tx.send(DequeueOutcome::Stalled);
                    }
                } else {
                    i += 1;
                }
            }
        }
        evicted
    }

    pub fn len(&self, family: ModelFamily) -> usize {
        self.partitions.get(&family).map(|p| p.lock().len()).unwrap_or(0)
    }

    pub fn is_empty(&self, family: ModelFamily) -> bool {
        self.len(family) == 0
    }

    /// Longest current wait in `family`'s partition, for the wait-time
    /// estimator's ~3s recompute tick.
    pub fn longest_waiting(&self, family: ModelFamily) -> Option<Duration> {
        let partition = self.partitions.get(&family)?;
        let q = partition.lock();
        q.front().map(QueueEntry::waited)
    }

    /// Load figure feeding the heartbeat-size formula: the larger of unique
    /// active client identities or raw queue length across every partition.
    pub fn load(&self) -> usize {
        let mut unique = std::collections::HashSet::new();
        let mut total_len = 0usize;
        for partition in self.partitions.iter() {
            let q = partition.value().lock();
            total_len += q.len();
            for entry in q.iter() {
                unique.insert(entry.identifier.occupancy_key());
            }
        }
        unique.len().max(total_len)
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// FIFO by enqueue time, except shared-IP identities are deprioritized to
/// the tail: pick the earliest non-shared-IP entry, falling back to the
/// front (oldest) entry if every queued entry is shared-IP.
fn head_position(q: &VecDeque<QueueEntry>) -> Option<usize> {
    if q.is_empty() {
        return None;
    }
    q.iter().position(|e| !e.identifier.is_shared_ip()).or(Some(0))
}

pub async fn run_dequeue_loop(queue: Arc<RequestQueue>, pool: Arc<KeyPool>, cancel: tokio_util::sync::CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(DEQUEUE_TICK) => {}
        }
        queue.tick_dequeue(&pool);
    }
}

pub async fn run_stall_reaper(queue: Arc<RequestQueue>, cancel: tokio_util::sync::CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(STALL_REAPER_TICK) => {}
        }
        for id in queue.reap_stalled() {
            tracing::warn!(request_id = %id, "evicted a request stalled in queue");
        }
    }
}

pub async fn run_estimator_tick(queue: Arc<RequestQueue>, cancel: tokio_util::sync::CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(ESTIMATOR_TICK) => {}
        }
        queue.recompute_estimates();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::HashSet;

    use relay_core::{KeyProvider, Service};
    use relay_providers::mock::{ready_keys, MockOps};
    use relay_providers::GenericProvider;
    use relay_telemetry::MetricsRecorder;

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
    fn enqueue_respects_the_occupancy_cap() {
        let q = RequestQueue::new();
        let id = Identifier::ClientIp("1.1.1.1".into());
        assert!(q.enqueue(ModelFamily::Turbo, id.clone(), 0).is_ok());
        assert!(q.enqueue(ModelFamily::Turbo, id, 0).is_err());
    }

    #[test]
    fn retries_bypass_the_occupancy_cap() {
        let q = RequestQueue::new();
        let id = Identifier::ClientIp("1.1.1.1".into());
        assert!(q.enqueue(ModelFamily::Turbo, id.clone(), 0).is_ok());
        assert!(q.enqueue(ModelFamily::Turbo, id.clone(), 1).is_ok());
        assert!(q.enqueue(ModelFamily::Turbo, id, 1).is_ok());
    }

    #[test]
    fn shared_ip_gets_a_wider_occupancy_allowance() {
        let q = RequestQueue::new();
        let id = Identifier::SharedIp("9.9.9.9".into());
        for _ in 0..5 {
            assert!(q.enqueue(ModelFamily::Turbo, id.clone(), 0).is_ok());
        }
        assert!(q.enqueue(ModelFamily::Turbo, id, 0).is_err());
    }

    #[test]
    fn remove_releases_the_occupancy_slot() {
        let q = RequestQueue::new();
        let id = Identifier::ClientIp("1.1.1.1".into());
        let (req_id, _rx) = q.enqueue(ModelFamily::Turbo, id.clone(), 0).unwrap();
        assert!(q.remove(ModelFamily::Turbo, &req_id));
        assert!(q.enqueue(ModelFamily::Turbo, id, 0).is_ok());
    }

    #[test]
    fn tick_dequeue_resolves_the_oldest_non_shared_entry() {
        let q = RequestQueue::new();
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);

        let (_id1, rx1) = q.enqueue(ModelFamily::Turbo, Identifier::SharedIp("s".into()), 0).unwrap();
        let (_id2, rx2) = q.enqueue(ModelFamily::Turbo, Identifier::ClientIp("a".into()), 0).unwrap();

        q.tick_dequeue(&pool);

        assert_eq!(rx2.blocking_recv().unwrap(), DequeueOutcome::Proceed);
        assert_eq!(q.len(ModelFamily::Turbo), 1);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn tick_dequeue_does_nothing_when_no_key_is_free() {
        let q = RequestQueue::new();
        let pool = pool_with(Service::Anthropic, &[ModelFamily::Claude], 1);
        let fp = pool.list_all()[0].fingerprint.clone();
        pool.mark_rate_limited(Service::Anthropic, &fp, Duration::from_secs(30));
        let (_id, _rx) = q.enqueue(ModelFamily::Claude, Identifier::ClientIp("a".into()), 0).unwrap();
        q.tick_dequeue(&pool);
        assert_eq!(q.len(ModelFamily::Claude), 1);
    }

    #[test]
    fn reap_stalled_evicts_old_entries_and_notifies_stalled() {
        let q = RequestQueue::new();
        let (_id, rx) = q.enqueue(ModelFamily::Turbo, Identifier::ClientIp("a".into()), 0).unwrap();
        if let Some(partition) = q.partitions.get(&ModelFamily::Turbo) {
            partition.lock()[0].enqueue_time = Instant::now() - STALL_TIMEOUT - Duration::from_secs(1);
        }
        let evicted = q.reap_stalled();
        assert_eq!(evicted.len(), 1);
        assert_eq!(rx.blocking_recv().unwrap(), DequeueOutcome::Stalled);
    }

    #[test]
    fn load_is_the_larger_of_unique_identities_or_queue_length() {
        let q = RequestQueue::new();
        let id = Identifier::ClientIp("same".into());
        q.enqueue(ModelFamily::Turbo, id.clone(), 1).unwrap();
        q.enqueue(ModelFamily::Turbo, id, 1).unwrap();
        assert_eq!(q.load(), 2);
    }

    #[test]
    fn tick_dequeue_feeds_the_estimator_for_non_shared_ip_entries() {
        let q = RequestQueue::new();
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);
        assert_eq!(q.wait_estimate(ModelFamily::Turbo), None);
        let (_id, _rx) = q.enqueue(ModelFamily::Turbo, Identifier::ClientIp("a".into()), 0).unwrap();
        q.tick_dequeue(&pool);
        assert!(q.wait_estimate(ModelFamily::Turbo).is_some());
    }

    #[test]
    fn tick_dequeue_does_not_feed_the_estimator_for_shared_ip_entries() {
        let q = RequestQueue::new();
        let pool = pool_with(Service::OpenAi, &[ModelFamily::Turbo], 1);
        let (_id, _rx) = q.enqueue(ModelFamily::Turbo, Identifier::SharedIp("s".into()), 0).unwrap();
        q.tick_dequeue(&pool);
        assert_eq!(q.wait_estimate(ModelFamily::Turbo), None);
    }

    #[test]
    fn recompute_estimates_picks_up_the_longest_current_wait() {
        let q = RequestQueue::new();
        let (_id, _rx) = q.enqueue(ModelFamily::Turbo, Identifier::ClientIp("a".into()), 0).unwrap();
        if let Some(partition) = q.partitions.get(&ModelFamily::Turbo) {
            partition.lock()[0].enqueue_time = Instant::now() - Duration::from_secs(30);
        }
        q.recompute_estimates();
        assert!(q.wait_estimate(ModelFamily::Turbo).unwrap() >= Duration::from_secs(1));
    }
}
