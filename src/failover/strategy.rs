// ARCHITECTURE: Ordering Strategy - Attempt Sequence Policy
//
// Strategies are a closed set of tagged variants behind one ordering
// function, selected by configuration key at construction time. They read a
// health snapshot and produce a permutation of the configured provider set;
// breaker filtering happens later in the failover manager, so every strategy
// returns the full set.
//
// The round-robin rotation cursor is explicit state owned by the strategy
// instance, advanced once per call so the starting position cycles across
// runs regardless of which provider ultimately serves the request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

use super::health::HealthRecord;
use super::provider::ProviderId;

#[derive(Debug)]
pub enum OrderingStrategy {
    /// Fixed configured rank order, independent of health.
    Priority,
    /// Rotating start position for long-run fairness of "first tried".
    RoundRobin { cursor: AtomicUsize },
    /// Fewest consecutive failures first, stable within ties.
    LeastFailures,
    /// Lowest recent average latency first; unsampled providers lead so they
    /// receive traffic and produce samples.
    LatencyWeighted,
}

impl OrderingStrategy {
    pub const DEFAULT_KEY: &'static str = "priority";

    pub fn from_key(key: &str) -> Result<Self> {
        match key {
            "priority" => Ok(Self::Priority),
            "round_robin" => Ok(Self::RoundRobin {
                cursor: AtomicUsize::new(0),
            }),
            "least_failures" => Ok(Self::LeastFailures),
            "latency_weighted" => Ok(Self::LatencyWeighted),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::RoundRobin { .. } => "round_robin",
            Self::LeastFailures => "least_failures",
            Self::LatencyWeighted => "latency_weighted",
        }
    }

    // CORE FUNCTION: Produce the attempt order for one failover run.
    // Read-only over the health snapshot; the round-robin cursor is the only
    // state a strategy mutates, and it belongs to the strategy itself.
    pub fn provider_order(
        &self,
        providers: &[ProviderId],
        health: &HashMap<ProviderId, HealthRecord>,
    ) -> Vec<ProviderId> {
        match self {
            Self::Priority => providers.to_vec(),
            Self::RoundRobin { cursor } => {
                if providers.is_empty() {
                    return Vec::new();
                }
                let start = cursor.fetch_add(1, Ordering::Relaxed) % providers.len();
                providers[start..]
                    .iter()
                    .chain(providers[..start].iter())
                    .cloned()
                    .collect()
            }
            Self::LeastFailures => {
                let mut order = providers.to_vec();
                order.sort_by_key(|provider| {
                    health
                        .get(provider)
                        .map(|record| record.consecutive_failures)
                        .unwrap_or(0)
                });
                order
            }
            Self::LatencyWeighted => {
                let mut order = providers.to_vec();
                order.sort_by(|a, b| {
                    avg_latency(health, a)
                        .partial_cmp(&avg_latency(health, b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                order
            }
        }
    }
}

// Unsampled providers sort ahead of any measured latency.
fn avg_latency(health: &HashMap<ProviderId, HealthRecord>, provider: &ProviderId) -> f64 {
    health
        .get(provider)
        .filter(|record| record.latency.samples > 0)
        .map(|record| record.latency.avg_ms)
        .unwrap_or(-1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::breaker::BreakerPhase;
    use crate::failover::health::{HealthStatus, LatencySummary};

    fn providers(ids: &[&str]) -> Vec<ProviderId> {
        ids.iter().map(|id| ProviderId::from(*id)).collect()
    }

    fn record(provider: &str, failures: u32, avg_ms: f64, samples: usize) -> HealthRecord {
        HealthRecord {
            provider: provider.into(),
            status: HealthStatus::Healthy,
            breaker_phase: BreakerPhase::Closed,
            consecutive_failures: failures,
            total_attempts: samples as u64,
            total_failures: failures as u64,
            last_success_at: None,
            last_failure_at: None,
            latency: LatencySummary {
                samples,
                avg_ms,
                p50_ms: avg_ms as u64,
                p95_ms: avg_ms as u64,
            },
        }
    }

    fn snapshot(records: Vec<HealthRecord>) -> HashMap<ProviderId, HealthRecord> {
        records
            .into_iter()
            .map(|record| (record.provider.clone(), record))
            .collect()
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = OrderingStrategy::from_key("fastest_cheapest").unwrap_err();
        assert!(matches!(err, Error::UnknownStrategy(key) if key == "fastest_cheapest"));
    }

    #[test]
    fn priority_preserves_configured_order() {
        let strategy = OrderingStrategy::from_key("priority").unwrap();
        let set = providers(&["a", "b", "c"]);
        let health = snapshot(vec![record("a", 9, 500.0, 10)]);
        // Health is ignored entirely
        assert_eq!(strategy.provider_order(&set, &health), set);
        assert_eq!(strategy.provider_order(&set, &health), set);
    }

    #[test]
    fn round_robin_rotates_and_wraps() {
        let strategy = OrderingStrategy::from_key("round_robin").unwrap();
        let set = providers(&["a", "b", "c"]);
        let health = HashMap::new();

        assert_eq!(strategy.provider_order(&set, &health), providers(&["a", "b", "c"]));
        assert_eq!(strategy.provider_order(&set, &health), providers(&["b", "c", "a"]));
        assert_eq!(strategy.provider_order(&set, &health), providers(&["c", "a", "b"]));
        assert_eq!(strategy.provider_order(&set, &health), providers(&["a", "b", "c"]));
    }

    #[test]
    fn round_robin_first_position_is_fair() {
        let strategy = OrderingStrategy::from_key("round_robin").unwrap();
        let set = providers(&["a", "b", "c"]);
        let health = HashMap::new();

        let mut first_counts: HashMap<ProviderId, usize> = HashMap::new();
        for _ in 0..12 {
            let order = strategy.provider_order(&set, &health);
            *first_counts.entry(order[0].clone()).or_insert(0) += 1;
        }
        for provider in &set {
            assert_eq!(first_counts[provider], 4, "each provider leads 12/3 runs");
        }
    }

    #[test]
    fn least_failures_sorts_ascending_and_stable() {
        let strategy = OrderingStrategy::from_key("least_failures").unwrap();
        let set = providers(&["a", "b", "c", "d"]);
        let health = snapshot(vec![
            record("a", 2, 10.0, 5),
            record("b", 0, 10.0, 5),
            record("d", 1, 10.0, 5),
        ]);
        // c has no record and counts as zero failures; ties keep input order
        assert_eq!(
            strategy.provider_order(&set, &health),
            providers(&["b", "c", "d", "a"])
        );
    }

    #[test]
    fn latency_weighted_puts_unsampled_first() {
        let strategy = OrderingStrategy::from_key("latency_weighted").unwrap();
        let set = providers(&["slow", "fast", "new"]);
        let health = snapshot(vec![
            record("slow", 0, 900.0, 8),
            record("fast", 0, 120.0, 8),
            record("new", 0, 0.0, 0),
        ]);
        assert_eq!(
            strategy.provider_order(&set, &health),
            providers(&["new", "fast", "slow"])
        );
    }
}
