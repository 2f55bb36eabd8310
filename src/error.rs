//! Thumbproxy error types

use std::time::Duration;

/// Thumbproxy error types
///
/// `Clone` so that callers attached to the same in-flight upstream batch
/// can all observe its failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    // Caller errors
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Upstream/network errors
    #[error("network error: {0}")]
    Network(String),

    #[error("failed to read upstream response: {0}")]
    Read(String),

    #[error("upstream call exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Runtime errors
    /// A background upstream batch ended without producing a result.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Whether the fetcher should retry an attempt that failed with this error.
    ///
    /// Transport and body-read failures are retryable. Rate limiting is not
    /// an error at all; it is reported on [`FetchOutcome`](crate::FetchOutcome).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProxyError::Network(_) | ProxyError::Read(_))
    }
}

/// Result type alias for thumbproxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
