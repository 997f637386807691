pub mod config;
pub mod error;
pub mod failover;

pub use config::FailoverConfig;
pub use error::{Error, Result};
pub use failover::{
    AttemptOutcome, BreakerPhase, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig,
    FailoverManager, FailoverMetrics, FailoverSuccess, FailureKind, HealthRecord, HealthStatus,
    LatencySummary, OrderingStrategy, ProviderError, ProviderHealthRegistry, ProviderId,
};
