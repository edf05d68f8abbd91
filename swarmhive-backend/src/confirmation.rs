//! De-duplication of confirmations delivered over an at-least-once bus.
//!
//! Keys are scoped to their correlation id. Once a correlation reaches a
//! terminal confirmation its key set is dropped and a tombstone absorbs any
//! later keyed delivery for it until the retention window expires.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use swarmhive_shared::ConfirmationEnvelope;
use swarmhive_shared::identity::normalize;

/// Default time a correlation is remembered
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct Correlation {
    keys: HashSet<String>,
    opened_at: Instant,
    completed_at: Option<Instant>,
}

impl Correlation {
    fn new(now: Instant) -> Self {
        Self {
            keys: HashSet::new(),
            opened_at: now,
            completed_at: None,
        }
    }

    fn expired(&self, now: Instant, retention: Duration) -> bool {
        let since = self.completed_at.unwrap_or(self.opened_at);
        now.saturating_duration_since(since) >= retention
    }
}

pub struct ConfirmationTracker {
    correlations: DashMap<String, Correlation>,
    retention: Duration,
}

impl Default for ConfirmationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl ConfirmationTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            correlations: DashMap::new(),
            retention,
        }
    }

    /// Record one delivery. Returns `true` the first time a key is seen for a
    /// correlation and `false` for every replay.
    pub fn record(&self, correlation_id: &str, idempotency_key: Option<&str>) -> bool {
        let Some(key) = normalize(idempotency_key) else {
            warn!(
                correlation_id,
                "Confirmation without idempotency key, treating as new"
            );
            return true;
        };

        let now = Instant::now();
        let mut entry = self
            .correlations
            .entry(correlation_id.to_string())
            .or_insert_with(|| Correlation::new(now));

        if entry.completed_at.is_some() {
            debug!(correlation_id, key, "Delivery after terminal state absorbed");
            return false;
        }

        let is_new = entry.keys.insert(key);
        if !is_new {
            debug!(correlation_id, "Duplicate confirmation absorbed");
        }
        is_new
    }

    /// Mark a correlation terminal. Its keys are released and replays are
    /// absorbed until retention expires.
    pub fn complete(&self, correlation_id: &str) {
        let now = Instant::now();
        let mut entry = self
            .correlations
            .entry(correlation_id.to_string())
            .or_insert_with(|| Correlation::new(now));
        if entry.completed_at.is_none() {
            entry.keys = HashSet::new();
            entry.completed_at = Some(now);
        }
    }

    /// Record a terminal confirmation. Returns whether it should be forwarded.
    pub fn observe(&self, confirmation: &ConfirmationEnvelope) -> bool {
        let forward = self.record(
            &confirmation.correlation_id,
            confirmation.idempotency_key.as_deref(),
        );
        if forward && confirmation.idempotency_key.is_some() {
            self.complete(&confirmation.correlation_id);
        }
        forward
    }

    /// Forget correlations older than the retention window. Returns how many
    /// were dropped.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let before = self.correlations.len();
        let retention = self.retention;
        self.correlations
            .retain(|_, correlation| !correlation.expired(now, retention));
        let evicted = before.saturating_sub(self.correlations.len());
        if evicted > 0 {
            debug!("Evicted {} expired correlations", evicted);
        }
        evicted
    }

    pub fn tracked(&self) -> usize {
        self.correlations.len()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swarmhive_shared::{Confirmer, Scope, SignalEnvelope};

    fn confirmation() -> ConfirmationEnvelope {
        let signal = SignalEnvelope::targeted(
            "config-update",
            &Scope::instance("sw1", "generator", "gen-1"),
            json!({"rate": 10}),
        );
        ConfirmationEnvelope::success(
            &signal,
            &Confirmer {
                swarm_id: "sw1",
                role: "generator",
                instance: "gen-1",
            },
            None,
            None,
        )
    }

    #[test]
    fn test_first_key_is_new_and_replay_is_not() {
        let tracker = ConfirmationTracker::default();
        assert!(tracker.record("c-1", Some("k-1")));
        assert!(!tracker.record("c-1", Some("k-1")));
        assert!(tracker.record("c-1", Some("k-2")));
        assert!(tracker.record("c-2", Some("k-1")));
    }

    #[test]
    fn test_missing_key_is_always_new() {
        let tracker = ConfirmationTracker::default();
        assert!(tracker.record("c-1", None));
        assert!(tracker.record("c-1", None));
        assert!(tracker.record("c-1", Some("  ")));
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_replayed_confirmation_forwards_once() {
        let tracker = ConfirmationTracker::default();
        let conf = confirmation();
        let forwarded = (0..5).filter(|_| tracker.observe(&conf)).count();
        assert_eq!(forwarded, 1);
    }

    #[test]
    fn test_replay_pairs_forward_exactly_once() {
        let tracker = ConfirmationTracker::default();
        for n in 0..50 {
            let correlation = format!("corr-{}", n % 7);
            let key = format!("key-{}", n);
            let first = tracker.record(&correlation, Some(&key));
            let second = tracker.record(&correlation, Some(&key));
            assert!(first);
            assert!(!second);
        }
    }

    #[test]
    fn test_completed_correlation_absorbs_late_deliveries() {
        let tracker = ConfirmationTracker::default();
        assert!(tracker.record("c-1", Some("k-1")));
        tracker.complete("c-1");
        assert!(!tracker.record("c-1", Some("k-1")));
        assert!(!tracker.record("c-1", Some("k-9")));
    }

    #[test]
    fn test_eviction_after_retention() {
        let tracker = ConfirmationTracker::new(Duration::from_secs(60));
        assert!(tracker.record("c-1", Some("k-1")));
        tracker.complete("c-1");
        assert!(tracker.record("c-2", Some("k-1")));

        let now = Instant::now();
        assert_eq!(tracker.evict_expired(now), 0);
        assert_eq!(tracker.evict_expired(now + Duration::from_secs(61)), 2);
        assert_eq!(tracker.tracked(), 0);

        // Forgotten correlations are new again
        assert!(tracker.record("c-1", Some("k-1")));
    }
}
