//! # Error Types
//!
//! Fetch failures are recovered by the service's cache fallback; only
//! [`EngineError`] ever reaches a caller.

use thiserror::Error;

/// Errors a remote data source can report.
///
/// The service treats every variant the same way: the fetch failed, fall back
/// to whatever is cached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connectivity problem (DNS, connect, timeout, TLS)
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status
    #[error("server error: HTTP {0}")]
    Server(u16),

    /// Response body could not be decoded
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The source does not know the requested location
    #[error("invalid location")]
    InvalidLocation,

    /// The source has nothing for the requested range
    #[error("no data available")]
    NoDataAvailable,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            FetchError::Server(status.as_u16())
        } else if err.is_decode() {
            FetchError::Decoding(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Errors surfaced by the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Remote fetch failed and nothing was cached for the query
    #[error("conditions unavailable: {0}")]
    Fetch(#[from] FetchError),

    /// Caller supplied a malformed argument
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
