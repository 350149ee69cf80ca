//! Error types shared across the update pipeline
//!
//! Failures from the structuring and extraction services are folded into a
//! single classification the scheduler acts on: authentication problems stop
//! retries, transient transport problems requeue the consumed text for the
//! next cadence tick, and malformed responses get one simplified retry
//! before being surfaced.

use thiserror::Error;

/// Failure classification for a structuring or extraction call
#[derive(Debug, Clone, Error)]
pub enum UpdateError {
    /// The provider rejected the configured credentials. Never retried.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Timeout, connection failure or a server-side error. The consumed
    /// text is requeued and picked up again on the natural cadence.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// The provider is throttling requests (HTTP 429).
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// The response arrived but could not be parsed into a valid structure.
    #[error("Unparseable structure response: {0}")]
    StructureParse(String),

    /// The extraction service could not be reached at all.
    #[error("Extraction service unreachable: {0}")]
    RemoteUnreachable(String),
}

impl UpdateError {
    /// Classify a non-success HTTP status returned by a provider.
    pub fn from_status(status: u16, message: String) -> Self {
        let message = if message.trim().is_empty() {
            "no response body".to_string()
        } else {
            message
        };
        match status {
            401 | 403 => UpdateError::AuthFailed(format!("status {status}: {message}")),
            429 => UpdateError::RateLimited(message),
            _ => UpdateError::TransientNetwork(format!("server error ({status}): {message}")),
        }
    }

    /// Classify a transport-level failure from a provider call.
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            UpdateError::TransientNetwork(format!("request timed out: {error}"))
        } else if error.is_connect() {
            UpdateError::TransientNetwork(format!("connection failed: {error}"))
        } else {
            UpdateError::TransientNetwork(error.to_string())
        }
    }

    /// True when the failure came from response shape rather than transport.
    pub fn is_parse(&self) -> bool {
        matches!(self, UpdateError::StructureParse(_))
    }
}

/// Credential resolution errors
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("No API key found in {0}")]
    MissingKey(String),

    #[error("Invalid credential data: {0}")]
    InvalidData(String),
}
