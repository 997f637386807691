use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque identifier for one interchangeable backend provider.
///
/// Supplied by configuration and immutable for the process lifetime. The
/// engine never interprets the contents; equality and ordering are the only
/// operations it relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// CLASSIFICATION: FailureKind - Provider Failure Categories
// Closed set of categories the adapters map their transport/API errors onto.
// The engine treats every kind the same for routing purposes; the category
// only flows into health records and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Timeout,         // No response within the attempt deadline
    RateLimited,     // Provider returned a throttling response (e.g. HTTP 429)
    Auth,            // Invalid or expired credentials
    Network,         // Connection/transport error before a response
    InvalidResponse, // Response received but unusable (malformed, empty)
    Unknown,         // Uncategorized failure
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Auth => "auth",
            FailureKind::Network => "network",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure raised by a provider adapter for one invocation.
///
/// This is the error half of the unit-of-work contract: adapters perform the
/// actual request and surface failures already classified, so the engine
/// records them without inspecting request content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct ProviderError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("no response within {}ms", limit.as_millis()),
        )
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unknown, message)
    }
}

// DATA STRUCTURE: AttemptOutcome - Result of One Invocation
// Immutable once built; consumed by the health registry to update the
// provider's record and breaker, then discarded. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptOutcome {
    pub provider: ProviderId,
    pub success: bool,
    pub error: Option<FailureKind>,
    pub duration_ms: u64,
}

impl AttemptOutcome {
    pub fn success(provider: ProviderId, duration: Duration) -> Self {
        Self {
            provider,
            success: true,
            error: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn failure(provider: ProviderId, kind: FailureKind, duration: Duration) -> Self {
        Self {
            provider,
            success: false,
            error: Some(kind),
            duration_ms: duration.as_millis() as u64,
        }
    }
}
