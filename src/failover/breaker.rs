// ARCHITECTURE: Circuit Breaker Pattern - Per-Provider Admission Gate
//
// DESIGN PHILOSOPHY:
// This module implements the per-provider circuit breaker that decides whether
// a provider is currently eligible for attempts:
// 1. FAULT ISOLATION: Stop routing work to a consistently failing provider
// 2. FAIL-FAST: Quarantined providers are skipped without invoking the adapter
// 3. AUTOMATIC RECOVERY: Single-probe testing after the cooldown elapses
// 4. LAZY TRANSITIONS: OPEN -> HALF_OPEN happens on the eligibility query,
//    no background timer or monitor task
//
// CIRCUIT BREAKER STATES:
// CLOSED (Normal Operation):
//   - All attempts admitted
//   - Consecutive failures counted; threshold reached -> OPEN
//
// OPEN (Quarantined):
//   - No attempts admitted until the cooldown elapses
//   - First eligibility query after expiry becomes the HALF_OPEN probe
//
// HALF_OPEN (Recovery Testing):
//   - Exactly one probe attempt admitted
//   - Probe success -> CLOSED (counters reset)
//   - Probe failure -> OPEN with the cooldown grown exponentially, capped

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

// CONFIGURATION: CircuitBreakerConfig - Admission Gate Parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32, // Consecutive failures to trip the breaker (default: 3)
    pub cooldown_ms: u64,       // Base quarantine duration after tripping (default: 30s)
    pub backoff_multiplier: u32, // Cooldown growth factor after a failed probe (default: 2)
    pub max_cooldown_ms: u64,   // Upper bound for the grown cooldown (default: 5min)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
            backoff_multiplier: 2,
            max_cooldown_ms: 300_000,
        }
    }
}

impl CircuitBreakerConfig {
    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }
}

// STATE MACHINE: BreakerPhase - Three-State Admission Gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerPhase {
    Closed,   // Normal operation, all attempts admitted
    Open,     // Quarantined, no attempts until cooldown elapses
    HalfOpen, // Recovery testing, exactly one probe in flight
}

/// Read-only breaker status for the operational query surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub phase: BreakerPhase,
    pub consecutive_failures: u32,
    pub current_cooldown_ms: u64,
    pub cooldown_remaining_ms: u64,
}

#[derive(Debug)]
struct BreakerInner {
    phase: BreakerPhase,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_claimed_at: Option<Instant>,
    current_cooldown: Duration,
}

// CORE SYSTEM: CircuitBreaker - Per-Provider State Machine
// All transitions are driven by recorded outcomes plus the lazy time check in
// `is_eligible`; the mutex makes the OPEN -> HALF_OPEN claim atomic so exactly
// one concurrent caller wins the probe slot.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        let base = config.cooldown();
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                phase: BreakerPhase::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_claimed_at: None,
                current_cooldown: base,
            }),
        }
    }

    // CORE QUERY: Admission check used by the failover manager.
    // Performs the lazy OPEN -> HALF_OPEN transition and claims the single
    // probe slot as a side effect of being queried. A probe claim older than
    // the current cooldown counts as abandoned (the claiming run was canceled
    // before invoking) and is re-issued.
    pub async fn is_eligible(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            BreakerPhase::Closed => true,
            BreakerPhase::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= inner.current_cooldown {
                    inner.phase = BreakerPhase::HalfOpen;
                    inner.probe_claimed_at = Some(Instant::now());
                    info!(
                        cooldown_ms = inner.current_cooldown.as_millis() as u64,
                        "circuit breaker HALF_OPEN, probe admitted"
                    );
                    true
                } else {
                    false
                }
            }
            BreakerPhase::HalfOpen => match inner.probe_claimed_at {
                Some(claimed) if claimed.elapsed() <= inner.current_cooldown => false,
                _ => {
                    inner.probe_claimed_at = Some(Instant::now());
                    true
                }
            },
        }
    }

    // TRANSITION: Any state -> CLOSED on a recorded success.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.phase != BreakerPhase::Closed {
            info!("circuit breaker CLOSED, provider recovered");
        }
        inner.phase = BreakerPhase::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_claimed_at = None;
        inner.current_cooldown = self.config.cooldown();
    }

    // TRANSITION: Failure handling per state.
    // CLOSED counts toward the threshold; HALF_OPEN means the probe failed and
    // the quarantine restarts with a grown cooldown; OPEN covers the
    // last-resort attempt made while quarantined, which also restarts it.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.phase {
            BreakerPhase::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.phase = BreakerPhase::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        consecutive_failures = inner.consecutive_failures,
                        cooldown_ms = inner.current_cooldown.as_millis() as u64,
                        "circuit breaker OPENED"
                    );
                }
            }
            BreakerPhase::HalfOpen => {
                inner.phase = BreakerPhase::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_claimed_at = None;
                inner.current_cooldown = self.grown_cooldown(inner.current_cooldown);
                warn!(
                    cooldown_ms = inner.current_cooldown.as_millis() as u64,
                    "probe failed, circuit breaker re-OPENED"
                );
            }
            BreakerPhase::Open => {
                inner.opened_at = Some(Instant::now());
                inner.current_cooldown = self.grown_cooldown(inner.current_cooldown);
            }
        }
    }

    fn grown_cooldown(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.config.backoff_multiplier.max(1))
            .min(self.config.max_cooldown())
    }

    // API: Operator-triggered recovery, forces CLOSED with zero failures.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.phase = BreakerPhase::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_claimed_at = None;
        inner.current_cooldown = self.config.cooldown();
        info!("circuit breaker manually reset to CLOSED");
    }

    // API: Force quarantine for maintenance.
    pub async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        inner.phase = BreakerPhase::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_claimed_at = None;
        warn!("circuit breaker manually forced OPEN");
    }

    pub async fn phase(&self) -> BreakerPhase {
        self.inner.lock().await.phase
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.lock().await.consecutive_failures
    }

    /// Time spent in OPEN so far, `None` unless currently OPEN.
    /// The longest-open provider is the last-resort candidate when every
    /// breaker is quarantined.
    pub async fn open_elapsed(&self) -> Option<Duration> {
        let inner = self.inner.lock().await;
        match inner.phase {
            BreakerPhase::Open => inner.opened_at.map(|t| t.elapsed()),
            _ => None,
        }
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        let remaining = match (inner.phase, inner.opened_at) {
            (BreakerPhase::Open, Some(opened_at)) => {
                inner.current_cooldown.saturating_sub(opened_at.elapsed())
            }
            _ => Duration::ZERO,
        };
        BreakerSnapshot {
            phase: inner.phase,
            consecutive_failures: inner.consecutive_failures,
            current_cooldown_ms: inner.current_cooldown.as_millis() as u64,
            cooldown_remaining_ms: remaining.as_millis() as u64,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
