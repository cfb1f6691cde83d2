//! Completion client error types.

use thiserror::Error;

/// Result type for completion operations.
pub type CompletionResult<T> = Result<T, CompletionError>;

/// Errors from one completion round trip.
///
/// Retry policy lives in the client: `Auth` and `MalformedResponse` are
/// never retried within a cycle, `Network` gets one retry, `RateLimited`
/// a small bounded number with backoff. All of them stay local to the one
/// conversation being processed.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The API rejected the credential. Surfaced to the operator.
    #[error("completion API rejected credentials: {0}")]
    Auth(String),

    /// The API asked us to slow down.
    #[error("completion API rate limited: {0}")]
    RateLimited(String),

    /// The response did not have the expected completion shape. Treated
    /// as an empty reply: logged, nothing sent.
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    /// Transport-level failure (DNS, timeout, 5xx).
    #[error("completion API request failed: {0}")]
    Network(String),
}

impl CompletionError {
    /// Short tag for the call log.
    pub fn kind(&self) -> &'static str {
        match self {
            CompletionError::Auth(_) => "auth",
            CompletionError::RateLimited(_) => "rate_limited",
            CompletionError::MalformedResponse(_) => "malformed_response",
            CompletionError::Network(_) => "network",
        }
    }
}
