//! Error types for the ingestion and extraction pipeline.
//!
//! Errors are classified by recoverability:
//! - Retryable: oracle transport failures, timeouts, rate limits
//! - Permanent: malformed oracle output, unsupported attachment formats
//!
//! The batch-level policy is "continue on item error" — one bad message
//! never aborts the remainder of a run, so most of these surface only
//! through logs and run statistics.

use thiserror::Error;

/// Errors from the extraction oracle (transport + response parsing).
#[derive(Debug, Error)]
pub enum OracleError {
    // Retryable errors
    #[error("Oracle transport error: {0}")]
    Transport(String),

    #[error("Oracle request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Oracle rate limit exceeded")]
    RateLimit,

    // Permanent errors
    #[error("Oracle API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Oracle response contained no JSON object: {0}")]
    MalformedResponse(String),

    #[error("Oracle API key not configured (set {0})")]
    MissingApiKey(String),
}

impl OracleError {
    /// Returns true if retrying the same request may succeed.
    ///
    /// A malformed (non-JSON) response is a permanent failure for that
    /// item — the model has already answered, retrying burns budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::Transport(_) | OracleError::Timeout(_) | OracleError::RateLimit
        )
    }
}

/// Errors from the mail source and message decoding.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Failed to read mailbox directory {0}: {1}")]
    Mailbox(String, std::io::Error),

    #[error("Unparseable message: {0}")]
    Unparseable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from attachment text extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported format: .{0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Top-level pipeline errors. Item-scoped variants are logged and the
/// batch continues; only setup failures (config, database) abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Db(#[from] crate::db::DbError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(OracleError::Transport("connection reset".into()).is_retryable());
        assert!(OracleError::Timeout(30).is_retryable());
        assert!(OracleError::RateLimit.is_retryable());
    }

    #[test]
    fn test_malformed_response_is_permanent() {
        assert!(!OracleError::MalformedResponse("I couldn't find any metrics".into())
            .is_retryable());
        assert!(!OracleError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
    }
}
