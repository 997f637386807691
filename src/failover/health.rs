// ARCHITECTURE: Provider Health Registry - Shared Operational State Store
//
// DESIGN PHILOSOPHY:
// The registry is the only shared mutable state in the engine. It maps each
// provider to an entry holding that provider's circuit breaker and health
// statistics:
// 1. PER-PROVIDER ATOMICITY: the map lock only guards map shape; every update
//    goes through the entry's own lock, so concurrent runs against different
//    providers never serialize against each other
// 2. DERIVED STATUS: healthy/degraded/unavailable is computed from breaker
//    phase and failure count on read, never stored
// 3. BOUNDED MEMORY: latency samples live in a most-recent-N ring buffer;
//    percentiles derive from that window only
// 4. RESET, NEVER DELETE: entries are created on first reference and live for
//    the process lifetime

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::breaker::{BreakerPhase, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use super::provider::{AttemptOutcome, ProviderId};

pub const DEFAULT_LATENCY_WINDOW: usize = 32;

// CLASSIFICATION: HealthStatus - Three-Tier Provider Health
// Pure function of breaker phase and consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,     // Breaker closed, no consecutive failures
    Degraded,    // Failures observed but still admitted (closed or half-open)
    Unavailable, // Breaker open, provider quarantined
}

/// Latency statistics over the bounded sample window, in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub avg_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

// DATA STRUCTURE: HealthRecord - Fixed Snapshot Schema
// The single schema every health query returns; monitoring layers consume it
// as-is via serde.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub provider: ProviderId,
    pub status: HealthStatus,
    pub breaker_phase: BreakerPhase,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub latency: LatencySummary,
}

#[derive(Debug)]
struct ProviderStats {
    total_attempts: u64,
    total_failures: u64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    latency_samples: VecDeque<u64>,
}

impl ProviderStats {
    fn new() -> Self {
        Self {
            total_attempts: 0,
            total_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            latency_samples: VecDeque::new(),
        }
    }

    fn push_latency(&mut self, sample_ms: u64, window: usize) {
        while self.latency_samples.len() >= window {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(sample_ms);
    }

    fn latency_summary(&self) -> LatencySummary {
        if self.latency_samples.is_empty() {
            return LatencySummary::default();
        }
        let mut sorted: Vec<u64> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();
        LatencySummary {
            samples: sorted.len(),
            avg_ms: sum as f64 / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50),
            p95_ms: percentile(&sorted, 95),
        }
    }
}

// Nearest-rank percentile over an already sorted window.
fn percentile(sorted: &[u64], pct: u64) -> u64 {
    let rank = (pct * sorted.len() as u64).div_ceil(100);
    let idx = rank.saturating_sub(1).min(sorted.len() as u64 - 1) as usize;
    sorted[idx]
}

#[derive(Debug)]
struct ProviderEntry {
    breaker: CircuitBreaker,
    stats: Mutex<ProviderStats>,
}

// CORE SYSTEM: ProviderHealthRegistry - Source of Truth for Routing Decisions
#[derive(Debug)]
pub struct ProviderHealthRegistry {
    breaker_config: CircuitBreakerConfig,
    latency_window: usize,
    entries: RwLock<HashMap<ProviderId, Arc<ProviderEntry>>>,
}

impl ProviderHealthRegistry {
    pub fn new(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            breaker_config,
            latency_window: DEFAULT_LATENCY_WINDOW,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_latency_window(mut self, window: usize) -> Self {
        self.latency_window = window.max(1);
        self
    }

    // Entry lookup with creation on first reference.
    async fn entry(&self, provider: &ProviderId) -> Arc<ProviderEntry> {
        if let Some(entry) = self.entries.read().await.get(provider) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().await;
        Arc::clone(entries.entry(provider.clone()).or_insert_with(|| {
            Arc::new(ProviderEntry {
                breaker: CircuitBreaker::with_config(self.breaker_config.clone()),
                stats: Mutex::new(ProviderStats::new()),
            })
        }))
    }

    // CORE FUNCTION: Fold one attempt outcome into the provider's record.
    // Stats and breaker update under the entry's own locks; the outcome is
    // discarded afterwards.
    pub async fn record_outcome(&self, outcome: &AttemptOutcome) {
        let entry = self.entry(&outcome.provider).await;
        {
            let mut stats = entry.stats.lock().await;
            stats.total_attempts = stats.total_attempts.saturating_add(1);
            stats.push_latency(outcome.duration_ms, self.latency_window);
            if outcome.success {
                stats.last_success_at = Some(Utc::now());
            } else {
                stats.total_failures = stats.total_failures.saturating_add(1);
                stats.last_failure_at = Some(Utc::now());
            }
        }
        if outcome.success {
            entry.breaker.record_success().await;
        } else {
            entry.breaker.record_failure().await;
        }
    }

    // API: Health snapshot for one provider (entry created if absent).
    pub async fn get_health(&self, provider: &ProviderId) -> HealthRecord {
        let entry = self.entry(provider).await;
        Self::compose_record(provider, &entry).await
    }

    // API: Health snapshots for all providers the registry has seen.
    pub async fn system_health(&self) -> HashMap<ProviderId, HealthRecord> {
        let entries: Vec<(ProviderId, Arc<ProviderEntry>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();

        let mut records = HashMap::with_capacity(entries.len());
        for (provider, entry) in entries {
            let record = Self::compose_record(&provider, &entry).await;
            records.insert(provider, record);
        }
        records
    }

    /// Health snapshot restricted to the given providers, creating entries on
    /// first reference. The ordering strategies read this per run.
    pub async fn health_for(&self, providers: &[ProviderId]) -> HashMap<ProviderId, HealthRecord> {
        let mut records = HashMap::with_capacity(providers.len());
        for provider in providers {
            records.insert(provider.clone(), self.get_health(provider).await);
        }
        records
    }

    async fn compose_record(provider: &ProviderId, entry: &ProviderEntry) -> HealthRecord {
        let breaker = entry.breaker.snapshot().await;
        let stats = entry.stats.lock().await;
        HealthRecord {
            provider: provider.clone(),
            status: derive_status(breaker.phase, breaker.consecutive_failures),
            breaker_phase: breaker.phase,
            consecutive_failures: breaker.consecutive_failures,
            total_attempts: stats.total_attempts,
            total_failures: stats.total_failures,
            last_success_at: stats.last_success_at,
            last_failure_at: stats.last_failure_at,
            latency: stats.latency_summary(),
        }
    }

    // API: Breaker admission check, delegated per provider.
    pub async fn is_eligible(&self, provider: &ProviderId) -> bool {
        self.entry(provider).await.breaker.is_eligible().await
    }

    // API: Breaker status for the operational query surface.
    pub async fn breaker_status(&self, provider: &ProviderId) -> BreakerSnapshot {
        self.entry(provider).await.breaker.snapshot().await
    }

    // API: Operator-triggered recovery. Restores the breaker and clears the
    // latency window; lifetime totals and timestamps are kept.
    pub async fn reset(&self, provider: &ProviderId) {
        let entry = self.entry(provider).await;
        entry.breaker.reset().await;
        entry.stats.lock().await.latency_samples.clear();
        info!(provider = %provider, "provider health reset");
    }

    // API: Quarantine a provider manually for maintenance.
    pub async fn force_open(&self, provider: &ProviderId) {
        self.entry(provider).await.breaker.force_open().await;
    }

    /// Among `candidates`, the provider whose breaker has been OPEN the
    /// longest. Used for the last-resort attempt when every candidate is
    /// quarantined.
    pub async fn longest_open(&self, candidates: &[ProviderId]) -> Option<ProviderId> {
        let mut best: Option<(ProviderId, Duration)> = None;
        for candidate in candidates {
            let entry = self.entry(candidate).await;
            if let Some(elapsed) = entry.breaker.open_elapsed().await {
                let better = match &best {
                    Some((_, best_elapsed)) => elapsed > *best_elapsed,
                    None => true,
                };
                if better {
                    best = Some((candidate.clone(), elapsed));
                }
            }
        }
        best.map(|(provider, _)| provider)
    }
}

fn derive_status(phase: BreakerPhase, consecutive_failures: u32) -> HealthStatus {
    match phase {
        BreakerPhase::Open => HealthStatus::Unavailable,
        _ if consecutive_failures > 0 => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::provider::FailureKind;
    use tokio::task::JoinSet;

    fn registry(threshold: u32) -> ProviderHealthRegistry {
        ProviderHealthRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_ms: 60_000,
            backoff_multiplier: 2,
            max_cooldown_ms: 300_000,
        })
    }

    fn ok(provider: &str, ms: u64) -> AttemptOutcome {
        AttemptOutcome::success(provider.into(), Duration::from_millis(ms))
    }

    fn failed(provider: &str) -> AttemptOutcome {
        AttemptOutcome::failure(provider.into(), FailureKind::Network, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn entry_created_on_first_reference() {
        let registry = registry(3);
        let record = registry.get_health(&"openai".into()).await;
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.total_attempts, 0);
        assert!(registry.system_health().await.contains_key(&"openai".into()));
    }

    #[tokio::test]
    async fn status_degrades_then_recovers() {
        let registry = registry(3);
        let provider: ProviderId = "anthropic".into();

        registry.record_outcome(&failed("anthropic")).await;
        let record = registry.get_health(&provider).await;
        assert_eq!(record.status, HealthStatus::Degraded);
        assert_eq!(record.consecutive_failures, 1);
        assert!(record.last_failure_at.is_some());

        registry.record_outcome(&ok("anthropic", 20)).await;
        let record = registry.get_health(&provider).await;
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.total_attempts, 2);
        assert_eq!(record.total_failures, 1);
        assert!(record.last_success_at.is_some());
    }

    #[tokio::test]
    async fn unavailable_when_breaker_open() {
        let registry = registry(2);
        let provider: ProviderId = "gemini".into();
        registry.record_outcome(&failed("gemini")).await;
        registry.record_outcome(&failed("gemini")).await;

        let record = registry.get_health(&provider).await;
        assert_eq!(record.breaker_phase, BreakerPhase::Open);
        assert_eq!(record.status, HealthStatus::Unavailable);
        assert!(!registry.is_eligible(&provider).await);
    }

    #[tokio::test]
    async fn latency_window_stays_bounded() {
        let registry = registry(100).with_latency_window(4);
        for ms in [10, 20, 30, 40, 50, 60, 70, 80, 90, 100] {
            registry.record_outcome(&ok("openai", ms)).await;
        }
        let latency = registry.get_health(&"openai".into()).await.latency;
        assert_eq!(latency.samples, 4);
        // Only the most recent four samples (70..=100) remain
        assert_eq!(latency.avg_ms, 85.0);
        assert_eq!(latency.p50_ms, 80);
        assert_eq!(latency.p95_ms, 100);
    }

    #[tokio::test]
    async fn reset_restores_breaker_and_keeps_totals() {
        let registry = registry(1);
        let provider: ProviderId = "mistral".into();
        registry.record_outcome(&failed("mistral")).await;
        assert_eq!(
            registry.get_health(&provider).await.status,
            HealthStatus::Unavailable
        );

        registry.reset(&provider).await;
        let record = registry.get_health(&provider).await;
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.total_attempts, 1);
        assert_eq!(record.total_failures, 1);
        assert_eq!(record.latency.samples, 0);
        assert!(registry.is_eligible(&provider).await);
    }

    #[tokio::test]
    async fn longest_open_picks_earliest_quarantine() {
        let registry = registry(1);
        registry.record_outcome(&failed("first")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.record_outcome(&failed("second")).await;

        let candidates: Vec<ProviderId> = vec!["first".into(), "second".into()];
        assert_eq!(
            registry.longest_open(&candidates).await,
            Some("first".into())
        );
        assert_eq!(registry.longest_open(&["healthy".into()]).await, None);
    }

    #[tokio::test]
    async fn concurrent_failures_are_not_lost() {
        let registry = Arc::new(registry(1_000));
        let mut tasks = JoinSet::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.spawn(async move {
                registry.record_outcome(&failed("shared")).await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.expect("recording task panicked");
        }

        let record = registry.get_health(&"shared".into()).await;
        assert_eq!(record.consecutive_failures, 32);
        assert_eq!(record.total_failures, 32);
        assert_eq!(record.total_attempts, 32);
    }
}
