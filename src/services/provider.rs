//! Provider abstraction for the upstream market-data source.
//!
//! The fetch orchestrator only sees this trait, so the concrete provider
//! (Yahoo in production, a scripted stub in tests) can be swapped behind
//! `dyn MarketDataProvider`.

use crate::models::{CanonicalInterval, Lookback, OhlcvBar};
use async_trait::async_trait;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] isahc::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Upstream rejected request: {0}")]
    Rejected(String),

    #[error("Fetch timed out")]
    Timeout,
}

/// One network call per invocation: OHLCV rows for a symbol at a canonical
/// interval over a lookback period, or an empty series when the provider has
/// nothing. Never retries internally; the next freshness window is the retry.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(
        &self,
        symbol: &str,
        interval: CanonicalInterval,
        lookback: Lookback,
    ) -> Result<Vec<OhlcvBar>, ProviderError>;
}
