//! Advisory wait-time estimate per partition (§4.4), blending a historical
//! EMA of completed wait times with a current-longest-queued EMA so the
//! figure reacts quickly to a sudden backlog without being thrown off by one
//! slow outlier.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const HISTORICAL_ALPHA: f64 = 0.2;
const CURRENT_ALPHA: f64 = 0.3;
const HISTORICAL_WINDOW: Duration = Duration::from_secs(5 * 60);

pub struct WaitEstimator {
    samples: VecDeque<Instant>,
    historical_ema_secs: Option<f64>,
    current_longest_ema_secs: Option<f64>,
}

impl WaitEstimator {
    pub fn new() -> Self {
        Self { samples: VecDeque::new(), historical_ema_secs: None, current_longest_ema_secs: None }
    }

    /// Records one successful dequeue's wait time. Deprioritized (shared-IP)
    /// samples are excluded by the caller before this is reached.
    pub fn record_completion(&mut self, wait: Duration) {
        let now = Instant::now();
        self.samples.push_back(now);
        self.prune(now);
        let secs = wait.as_secs_f64();
        self.historical_ema_secs = Some(match self.historical_ema_secs {
            Some(prev) => HISTORICAL_ALPHA * secs + (1.0 - HISTORICAL_ALPHA) * prev,
            None => secs,
        });
    }

    fn prune(&mut self, now: Instant) {
        while let Some(ts) = self.samples.front() {
            if now.duration_since(*ts) > HISTORICAL_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Called on the ~3s recompute tick with the longest current wait still
    /// queued in the partition (`None` if the partition is empty).
    pub fn observe_current_longest(&mut self, longest_waiting: Option<Duration>) {
        let Some(wait) = longest_waiting else { return };
        let secs = wait.as_secs_f64();
        self.current_longest_ema_secs = Some(match self.current_longest_ema_secs {
            Some(prev) => CURRENT_ALPHA * secs + (1.0 - CURRENT_ALPHA) * prev,
            None => secs,
        });
    }

    pub fn estimate(&self) -> Option<Duration> {
        match (self.historical_ema_secs, self.current_longest_ema_secs) {
            (Some(h), Some(c)) => Some(Duration::from_secs_f64((h + c) / 2.0)),
            (Some(h), None) => Some(Duration::from_secs_f64(h)),
            (None, Some(c)) => Some(Duration::from_secs_f64(c)),
            (None, None) => None,
        }
    }
}

impl Default for WaitEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_estimator_has_no_estimate() {
        assert_eq!(WaitEstimator::new().estimate(), None);
    }

    #[test]
    fn historical_ema_tracks_completions() {
        let mut e = WaitEstimator::new();
        e.record_completion(Duration::from_secs(10));
        assert_eq!(e.estimate(), Some(Duration::from_secs(10)));
        e.record_completion(Duration::from_secs(10));
        assert_eq!(e.estimate(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn current_longest_pulls_the_estimate_up_during_a_backlog() {
        let mut e = WaitEstimator::new();
        e.record_completion(Duration::from_secs(1));
        let baseline = e.estimate().unwrap();
        e.observe_current_longest(Some(Duration::from_secs(120)));
        assert!(e.estimate().unwrap() > baseline);
    }

    #[test]
    fn an_empty_partition_does_not_perturb_the_current_ema() {
        let mut e = WaitEstimator::new();
        e.record_completion(Duration::from_secs(5));
        let before = e.estimate();
        e.observe_current_longest(None);
        assert_eq!(e.estimate(), before);
    }
}
