use thiserror::Error;

use crate::Symbol;

/// Per-facet fetch failure. Never fatal on its own: the snapshot simply
/// omits the facet that produced it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("provider returned HTTP {status}")]
    Provider { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout)
    }
}

/// Failures surfaced by the coordinator's public entry points.
#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
    /// Rejected before any network call.
    #[error("invalid symbol: {0}")]
    Validation(String),

    /// The identity (quote) fetch failed; this is the only "failed to load".
    #[error("failed to load {symbol}: {source}")]
    AggregateFailure { symbol: Symbol, source: FetchError },

    #[error("session closed")]
    SessionClosed,
}

impl AnalysisError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::AggregateFailure { .. })
    }
}
