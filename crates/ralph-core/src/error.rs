// Orchestrator Error Types
// Structured enough that the classifier operates on variants, never on
// message text.

use ralph_types::{SpecValidationError, Stage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("upstream {service} returned status {status}: {message}")]
    UpstreamStatus {
        service: String,
        status: u16,
        message: String,
    },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<OrchestratorError>,
        last_backoff_ms: Option<u64>,
    },

    #[error("agent failure: {0}")]
    Agent(String),

    #[error("{0}")]
    Other(String),
}

impl From<SpecValidationError> for OrchestratorError {
    fn from(err: SpecValidationError) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
