// ralph server
// The HTTP front end (webhook intake, health, metrics, run views), the
// in-process FIFO event queue, and the orchestrator service that drains it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use ralph_store::WorkflowStore;

mod config;
mod http;
mod orchestrator;
mod queue;

pub use config::{RalphConfig, RetrySettings};
pub use http::{app_router, serve};
pub use orchestrator::{AgentSuite, OrchestratorService};
pub use queue::{spawn_consumer, EventQueue};

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<WorkflowStore>,
    pub queue: EventQueue,
    pub config: Arc<RalphConfig>,
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: Arc<WorkflowStore>,
        queue: EventQueue,
        config: Arc<RalphConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            config,
            shutdown,
            started_at: Utc::now(),
        }
    }
}
