// Boundary Wrapper
// Uniform instrumentation for every call that crosses a trust or latency
// boundary: a span, success/error counters, a duration histogram observed on
// both paths, and a redacted warning on failure.

use std::future::Future;
use std::time::Instant;

use tracing::Instrument;

use ralph_core::{classify, Result};
use ralph_redact::redact_text;

/// Correlation fields attached to the boundary span.
#[derive(Debug, Clone, Default)]
pub struct BoundaryContext {
    pub event_id: Option<String>,
    pub run_id: Option<String>,
    pub issue_number: Option<u64>,
    pub task_key: Option<String>,
}

impl BoundaryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn with_run(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn with_issue(mut self, issue_number: u64) -> Self {
        self.issue_number = Some(issue_number);
        self
    }

    pub fn with_task(mut self, task_key: &str) -> Self {
        self.task_key = Some(task_key.to_string());
        self
    }
}

/// Run `fut` inside an `orchestrator.<name>` span. The duration histogram is
/// observed on success and failure alike; failures are logged at warn with a
/// redacted summary and re-raised untouched.
pub async fn with_boundary<T, Fut>(name: &str, context: &BoundaryContext, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let span_name = format!("orchestrator.{name}");
    let span = tracing::info_span!(
        "orchestrator.boundary",
        otel.name = %span_name,
        boundary = name,
        event_id = context.event_id.as_deref().unwrap_or(""),
        run_id = context.run_id.as_deref().unwrap_or(""),
        issue_number = context.issue_number.unwrap_or(0),
        task_key = context.task_key.as_deref().unwrap_or(""),
    );

    let started = Instant::now();
    let result = fut.instrument(span).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    metrics::histogram!(
        "ralph_orchestration_boundary_duration_ms",
        "boundary" => name.to_string()
    )
    .record(elapsed_ms);

    match &result {
        Ok(_) => {
            metrics::counter!(
                "ralph_orchestration_boundary_calls_total",
                "boundary" => name.to_string(),
                "result" => "success"
            )
            .increment(1);
        }
        Err(error) => {
            metrics::counter!(
                "ralph_orchestration_boundary_calls_total",
                "boundary" => name.to_string(),
                "result" => "error"
            )
            .increment(1);
            tracing::warn!(
                boundary = name,
                category = classify(error).as_str(),
                error = %redact_text(&error.to_string()),
                "boundary call failed"
            );
        }
    }

    result
}
