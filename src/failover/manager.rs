// ARCHITECTURE: Failover Manager - Routing Orchestration Root
//
// DESIGN PHILOSOPHY:
// The manager owns the orchestration loop for one logical operation across a
// prioritizable, health-aware pool of providers:
// 1. ORDERED SEQUENTIAL ATTEMPTS: candidates are tried strictly in the order
//    the strategy returned; first success wins, no hedged parallel fan-out
// 2. BREAKER GATING: quarantined providers are skipped without invoking the
//    adapter; every actual invocation updates shared health state
// 3. ABSORBED FAILURES: per-provider failures never cross the boundary
//    mid-loop; callers see one success or one terminal aggregate error
// 4. LOCKOUT AVOIDANCE: when every candidate is quarantined, the longest-open
//    one still gets a single last-resort attempt
//
// The unit of work is an opaque async callable supplied by the provider
// adapters. An optional caller-configured per-attempt timeout wraps each
// invocation; an elapse is classified and recorded as a Timeout failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FailoverConfig;
use crate::error::{Error, Result};

use super::breaker::BreakerSnapshot;
use super::health::{HealthRecord, ProviderHealthRegistry};
use super::provider::{AttemptOutcome, ProviderError, ProviderId};
use super::strategy::OrderingStrategy;

/// Successful failover run: which provider served, after how many attempts.
#[derive(Debug)]
pub struct FailoverSuccess<T> {
    pub run_id: Uuid,
    pub provider: ProviderId,
    pub value: T,
    pub attempts: u32,
}

// ANALYTICS: FailoverMetrics - Operational Intelligence
#[derive(Debug, Clone, Default, Serialize)]
pub struct FailoverMetrics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub exhausted_runs: u64,
    pub total_attempts: u64,
    pub skipped_candidates: u64,
    pub last_resort_attempts: u64,
    pub last_run_at: Option<u64>, // Unix timestamp of the most recent run
}

// Per-run counters, merged into the shared metrics once per run.
#[derive(Default)]
struct RunStats {
    attempts: u64,
    skipped: u64,
    last_resort: u64,
}

// CORE SYSTEM: FailoverManager - Health-Aware Provider Router
#[derive(Debug)]
pub struct FailoverManager {
    attempt_timeout: Option<Duration>,
    strategy: OrderingStrategy,
    registry: Arc<ProviderHealthRegistry>,
    metrics: RwLock<FailoverMetrics>,
}

impl FailoverManager {
    // CONSTRUCTOR: Build a manager and its registry from configuration.
    // Strategy key and parameter validation fail fast here, before any run.
    pub fn new(config: FailoverConfig) -> Result<Self> {
        let registry = Arc::new(
            ProviderHealthRegistry::new(config.breaker.clone())
                .with_latency_window(config.latency_window),
        );
        Self::with_registry(config, registry)
    }

    // CONSTRUCTOR: Build a manager over an existing shared registry, so
    // several managers (or an ops surface) can observe the same health state.
    pub fn with_registry(
        config: FailoverConfig,
        registry: Arc<ProviderHealthRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let strategy = OrderingStrategy::from_key(&config.strategy)?;
        info!(
            strategy = strategy.key(),
            failure_threshold = config.breaker.failure_threshold,
            cooldown_ms = config.breaker.cooldown_ms,
            "failover manager initialized"
        );
        Ok(Self {
            attempt_timeout: config.attempt_timeout_ms.map(Duration::from_millis),
            strategy,
            registry,
            metrics: RwLock::new(FailoverMetrics::default()),
        })
    }

    pub fn registry(&self) -> &Arc<ProviderHealthRegistry> {
        &self.registry
    }

    pub async fn metrics(&self) -> FailoverMetrics {
        self.metrics.read().await.clone()
    }

    // CORE FUNCTION: Execute one unit of work with automatic failover.
    //
    // Asks the strategy for an ordering, consults each candidate's breaker,
    // invokes the work for eligible candidates and records every outcome.
    // Returns the first success; after exhausting all candidates, raises one
    // aggregate error carrying the last attempt's classified failure.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        providers: &[ProviderId],
        work: F,
    ) -> Result<FailoverSuccess<T>>
    where
        F: Fn(ProviderId) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        if providers.is_empty() {
            return Err(Error::NoProviders);
        }

        let run_id = Uuid::new_v4();
        let health = self.registry.health_for(providers).await;
        let order = self.strategy.provider_order(providers, &health);
        debug!(run_id = %run_id, strategy = self.strategy.key(), candidates = order.len(), "failover run started");

        let mut stats = RunStats::default();
        let mut last_failure: Option<(ProviderId, ProviderError)> = None;

        for candidate in &order {
            if !self.registry.is_eligible(candidate).await {
                debug!(run_id = %run_id, provider = %candidate, "skipping quarantined provider");
                stats.skipped += 1;
                continue;
            }

            stats.attempts += 1;
            match self.attempt(run_id, candidate, &work).await {
                Ok(value) => {
                    return Ok(self.finish_success(run_id, candidate, value, stats).await);
                }
                Err(err) => {
                    last_failure = Some((candidate.clone(), err));
                }
            }
        }

        // Total lockout: every breaker refused. One last-resort attempt
        // against the longest-quarantined candidate keeps a shared transient
        // blip from locking the whole pool out.
        if stats.attempts == 0 {
            let candidate = match self.registry.longest_open(&order).await {
                Some(provider) => provider,
                None => order[0].clone(),
            };
            warn!(
                run_id = %run_id,
                provider = %candidate,
                "all providers quarantined, last-resort attempt"
            );
            stats.attempts += 1;
            stats.last_resort += 1;
            match self.attempt(run_id, &candidate, &work).await {
                Ok(value) => {
                    return Ok(self.finish_success(run_id, &candidate, value, stats).await);
                }
                Err(err) => {
                    last_failure = Some((candidate, err));
                }
            }
        }

        let attempts = stats.attempts as u32;
        self.merge_metrics(stats, false).await;
        match last_failure {
            Some((provider, source)) => {
                warn!(
                    run_id = %run_id,
                    attempts,
                    provider = %provider,
                    error = %source,
                    "all providers exhausted"
                );
                Err(Error::ProvidersExhausted {
                    attempts,
                    provider,
                    source,
                })
            }
            // The loop above always attempts at least one candidate, so a
            // missing failure means an empty order slipped through
            None => Err(Error::NoProviders),
        }
    }

    // EXECUTION: One invocation against one provider, timeout-wrapped when
    // configured, outcome recorded into the registry regardless of result.
    async fn attempt<T, F, Fut>(
        &self,
        run_id: Uuid,
        provider: &ProviderId,
        work: &F,
    ) -> std::result::Result<T, ProviderError>
    where
        F: Fn(ProviderId) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let invocation = work(provider.clone());
        let result = match self.attempt_timeout {
            Some(limit) => match timeout(limit, invocation).await {
                Ok(inner) => inner,
                Err(_) => Err(ProviderError::timeout(limit)),
            },
            None => invocation.await,
        };
        let duration = started.elapsed();

        let outcome = match &result {
            Ok(_) => AttemptOutcome::success(provider.clone(), duration),
            Err(err) => AttemptOutcome::failure(provider.clone(), err.kind, duration),
        };
        self.registry.record_outcome(&outcome).await;

        match &result {
            Ok(_) => debug!(
                run_id = %run_id,
                provider = %provider,
                duration_ms = outcome.duration_ms,
                "provider attempt succeeded"
            ),
            Err(err) => warn!(
                run_id = %run_id,
                provider = %provider,
                kind = %err.kind,
                duration_ms = outcome.duration_ms,
                "provider attempt failed"
            ),
        }
        result
    }

    async fn finish_success<T>(
        &self,
        run_id: Uuid,
        provider: &ProviderId,
        value: T,
        stats: RunStats,
    ) -> FailoverSuccess<T> {
        let attempts = stats.attempts as u32;
        self.merge_metrics(stats, true).await;
        debug!(run_id = %run_id, provider = %provider, attempts, "failover run succeeded");
        FailoverSuccess {
            run_id,
            provider: provider.clone(),
            value,
            attempts,
        }
    }

    // METRICS: Fold one run's counters into the shared metrics.
    async fn merge_metrics(&self, stats: RunStats, success: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_runs += 1;
        if success {
            metrics.successful_runs += 1;
        } else {
            metrics.exhausted_runs += 1;
        }
        metrics.total_attempts += stats.attempts;
        metrics.skipped_candidates += stats.skipped;
        metrics.last_resort_attempts += stats.last_resort;
        metrics.last_run_at = Some(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        );
    }

    // API: Health/status query surface for monitoring and operator tooling.
    pub async fn get_provider_health(&self, provider: &ProviderId) -> HealthRecord {
        self.registry.get_health(provider).await
    }

    pub async fn get_system_health(&self) -> HashMap<ProviderId, HealthRecord> {
        self.registry.system_health().await
    }

    pub async fn get_circuit_breaker_status(&self, provider: &ProviderId) -> BreakerSnapshot {
        self.registry.breaker_status(provider).await
    }

    // API: Operator-triggered recovery for one provider.
    pub async fn reset_circuit_breaker(&self, provider: &ProviderId) {
        self.registry.reset(provider).await;
    }

    // API: Manual quarantine for maintenance.
    pub async fn force_circuit_open(&self, provider: &ProviderId) {
        self.registry.force_open(provider).await;
    }
}
