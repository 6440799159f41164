// Agent Wire Models
// JSON payloads exchanged with the executor agent and the merge-decision
// generator. The orchestrator treats both as opaque callables.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentResultStatus {
    Completed,
    Blocked,
    NeedsReview,
}

/// Result of one subtask execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: String,
    pub status: AgentResultStatus,
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub commands_ran: Vec<CommandRun>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRun {
    pub cmd: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeVerdict {
    Approve,
    RequestChanges,
    Block,
}

impl MergeVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeVerdict::Approve => "approve",
            MergeVerdict::RequestChanges => "request_changes",
            MergeVerdict::Block => "block",
        }
    }

    pub fn parse(value: &str) -> Option<MergeVerdict> {
        match value {
            "approve" => Some(MergeVerdict::Approve),
            "request_changes" => Some(MergeVerdict::RequestChanges),
            "block" => Some(MergeVerdict::Block),
            _ => None,
        }
    }
}

/// Verdict produced by the merge-decision generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDecision {
    pub decision: MergeVerdict,
    pub rationale: String,
    #[serde(default)]
    pub blocking_findings: Vec<String>,
}
