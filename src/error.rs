use crate::failover::provider::{ProviderError, ProviderId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no providers configured for failover")]
    NoProviders,

    #[error("unknown ordering strategy: {0}")]
    UnknownStrategy(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("all providers exhausted after {attempts} attempts; last failure from {provider}: {source}")]
    ProvidersExhausted {
        attempts: u32,
        provider: ProviderId,
        #[source]
        source: ProviderError,
    },
}
