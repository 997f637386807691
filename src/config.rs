use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{Error, Result};
use crate::failover::breaker::CircuitBreakerConfig;
use crate::failover::health::DEFAULT_LATENCY_WINDOW;
use crate::failover::strategy::OrderingStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    pub strategy: String,
    pub attempt_timeout_ms: Option<u64>,
    pub latency_window: usize,
    pub breaker: CircuitBreakerConfig,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            strategy: env::var("FAILOVER_STRATEGY")
                .unwrap_or_else(|_| OrderingStrategy::DEFAULT_KEY.to_string()),
            attempt_timeout_ms: env::var("FAILOVER_ATTEMPT_TIMEOUT_MS")
                .ok()
                .and_then(|value| value.parse().ok()),
            latency_window: env::var("FAILOVER_LATENCY_WINDOW")
                .unwrap_or_else(|_| DEFAULT_LATENCY_WINDOW.to_string())
                .parse()
                .unwrap_or(DEFAULT_LATENCY_WINDOW),
            breaker: CircuitBreakerConfig {
                failure_threshold: env::var("BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
                cooldown_ms: env::var("BREAKER_COOLDOWN_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .unwrap_or(30_000),
                backoff_multiplier: env::var("BREAKER_BACKOFF_MULTIPLIER")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
                max_cooldown_ms: env::var("BREAKER_MAX_COOLDOWN_MS")
                    .unwrap_or_else(|_| "300000".to_string())
                    .parse()
                    .unwrap_or(300_000),
            },
        }
    }
}

impl FailoverConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(Error::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.breaker.cooldown_ms == 0 {
            return Err(Error::Config("cooldown_ms must be at least 1".to_string()));
        }
        if self.breaker.max_cooldown_ms < self.breaker.cooldown_ms {
            return Err(Error::Config(
                "max_cooldown_ms must be at least cooldown_ms".to_string(),
            ));
        }
        if self.latency_window == 0 {
            return Err(Error::Config(
                "latency_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FailoverConfig::default();
        assert_eq!(config.strategy, "priority");
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut config = FailoverConfig::default();
        config.breaker.failure_threshold = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn inverted_cooldown_bounds_are_rejected() {
        let mut config = FailoverConfig::default();
        config.breaker.cooldown_ms = 60_000;
        config.breaker.max_cooldown_ms = 30_000;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
