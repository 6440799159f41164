// ralph core
// The error taxonomy and classifier, the bounded-backoff retry engine, and
// the task DAG scheduler shared by the repository and the orchestrator.

pub mod classify;
pub mod error;
pub mod retry;
pub mod scheduler;

pub use classify::{classify, ErrorCategory};
pub use error::{OrchestratorError, Result};
pub use retry::{with_retry, RetryOutcome, RetryPolicy};
pub use scheduler::{pending_count, runnable_frontier, validate_work_breakdown, GraphError};
