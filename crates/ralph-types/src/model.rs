// Durable Workflow Entities
// Row-level shapes for events, runs, tasks, attempts, artifacts, merge
// decisions, and stage transitions. The repository owns their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
    DeadLetter,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(value: &str) -> Option<RunStatus> {
        match value {
            "in_progress" => Some(RunStatus::InProgress),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "dead_letter" => Some(RunStatus::DeadLetter),
            _ => None,
        }
    }

    /// Terminal statuses are absorbing: no further stage or status changes.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Retry,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Retry => "retry",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn parse(value: &str) -> Option<TaskStatus> {
        match value {
            "queued" => Some(TaskStatus::Queued),
            "running" => Some(TaskStatus::Running),
            "retry" => Some(TaskStatus::Retry),
            "completed" => Some(TaskStatus::Completed),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Completed,
    Blocked,
    NeedsReview,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Completed => "completed",
            AttemptStatus::Blocked => "blocked",
            AttemptStatus::NeedsReview => "needs_review",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<AttemptStatus> {
        match value {
            "completed" => Some(AttemptStatus::Completed),
            "blocked" => Some(AttemptStatus::Blocked),
            "needs_review" => Some(AttemptStatus::NeedsReview),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }
}

/// Three-way projection of the full error taxonomy recorded on attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptCategory {
    Transient,
    Deterministic,
    Unknown,
}

impl AttemptCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptCategory::Transient => "transient",
            AttemptCategory::Deterministic => "deterministic",
            AttemptCategory::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<AttemptCategory> {
        match value {
            "transient" => Some(AttemptCategory::Transient),
            "deterministic" => Some(AttemptCategory::Deterministic),
            "unknown" => Some(AttemptCategory::Unknown),
            _ => None,
        }
    }
}

/// One verified inbound webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: String,
    pub delivery_id: String,
    pub event_type: String,
    pub source_owner: String,
    pub source_repo: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<String>,
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// One logical orchestration run, progressing monotonically through stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    pub status: RunStatus,
    pub current_stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_yaml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_reason: Option<String>,
    pub external_task_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of the per-run dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub workflow_run_id: String,
    pub task_key: String,
    pub title: String,
    pub owner_role: String,
    pub status: TaskStatus,
    pub attempt_count: u32,
    #[serde(default)]
    pub definition_of_done: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// One outer execution attempt of a task. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAttempt {
    pub id: String,
    pub task_id: String,
    pub agent_role: String,
    pub attempt_number: u32,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub error_category: AttemptCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_delay_ms: Option<u64>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A produced blob tied to a run and optionally a task. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub workflow_run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub kind: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Well-known artifact kind tags. The set is open.
pub mod artifact_kind {
    pub const FORMAL_SPEC: &str = "formal_spec";
    pub const AGENT_RESULT: &str = "agent_result";
    pub const REVIEW_SUMMARY: &str = "review_summary";
    pub const UI_ACTION: &str = "ui_action";
    pub const TASK_BLOCKED: &str = "task_blocked";
}

/// Persisted merge decision for a run. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDecisionRecord {
    pub id: String,
    pub workflow_run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    pub decision: crate::agent::MergeVerdict,
    pub rationale: String,
    #[serde(default)]
    pub blocking_findings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One row per successful stage change. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub id: String,
    pub workflow_run_id: String,
    pub from_stage: Stage,
    pub to_stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub transitioned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::InProgress.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::DeadLetter.is_terminal());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Retry,
            TaskStatus::Completed,
            TaskStatus::Blocked,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            AttemptStatus::Completed,
            AttemptStatus::Blocked,
            AttemptStatus::NeedsReview,
            AttemptStatus::Failed,
        ] {
            assert_eq!(AttemptStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn run_serializes_with_snake_case_stage() {
        let run = WorkflowRun {
            id: "run-1".to_string(),
            issue_number: Some(12),
            pr_number: None,
            status: RunStatus::InProgress,
            current_stage: Stage::TaskRequested,
            spec_id: None,
            spec_yaml: None,
            dead_letter_reason: None,
            external_task_ref: "issue:12".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["current_stage"], "task_requested");
        assert!(value.get("pr_number").is_none());
    }
}
