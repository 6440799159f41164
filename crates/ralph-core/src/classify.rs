// Error Classifier
// Maps any orchestrator error to a retry category. Retriable categories are
// absorbed by the retry engine up to its attempt budget; fatal categories
// short-circuit it.

use ralph_types::AttemptCategory;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    RateLimit,
    Dependency,
    Timeout,
    Auth,
    Validation,
    Permanent,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Transient
                | ErrorCategory::RateLimit
                | ErrorCategory::Dependency
                | ErrorCategory::Timeout
                | ErrorCategory::Unknown
        )
    }

    /// Three-way projection recorded on agent attempts.
    pub fn attempt_category(self) -> AttemptCategory {
        match self {
            ErrorCategory::Transient
            | ErrorCategory::RateLimit
            | ErrorCategory::Dependency
            | ErrorCategory::Timeout => AttemptCategory::Transient,
            ErrorCategory::Auth | ErrorCategory::Validation | ErrorCategory::Permanent => {
                AttemptCategory::Deterministic
            }
            ErrorCategory::Unknown => AttemptCategory::Unknown,
        }
    }
}

pub fn classify(error: &OrchestratorError) -> ErrorCategory {
    match error {
        OrchestratorError::Timeout(_) => ErrorCategory::Timeout,
        OrchestratorError::Connection(_) => ErrorCategory::Dependency,
        OrchestratorError::RateLimited { .. } => ErrorCategory::RateLimit,
        OrchestratorError::Auth(_) => ErrorCategory::Auth,
        OrchestratorError::Validation(_) | OrchestratorError::InvalidTransition { .. } => {
            ErrorCategory::Validation
        }
        OrchestratorError::NotFound(_) | OrchestratorError::Conflict(_) => ErrorCategory::Permanent,
        OrchestratorError::Cancelled(_) => ErrorCategory::Permanent,
        OrchestratorError::UpstreamStatus { status, .. } => classify_status(*status),
        OrchestratorError::RetryExhausted { last_error, .. } => classify(last_error),
        OrchestratorError::Storage(_)
        | OrchestratorError::Agent(_)
        | OrchestratorError::Other(_) => ErrorCategory::Unknown,
    }
}

fn classify_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        400 | 422 => ErrorCategory::Validation,
        404 | 409 => ErrorCategory::Permanent,
        429 => ErrorCategory::RateLimit,
        502 | 503 => ErrorCategory::Dependency,
        500..=599 => ErrorCategory::Transient,
        400..=499 => ErrorCategory::Permanent,
        _ => ErrorCategory::Unknown,
    }
}
