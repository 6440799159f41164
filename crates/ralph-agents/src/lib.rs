// ralph agents
// Contracts for everything the orchestrator calls across a trust boundary:
// the code host and the four opaque generator/executor callables. The HTTP
// adapters live here too; the orchestrator depends only on the traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ralph_core::{OrchestratorError, Result};
use ralph_types::{AgentResult, FormalSpec, MergeDecision};

pub mod github;
pub mod http_agent;

pub use github::GitHubClient;
pub use http_agent::HttpAgentService;

/// Issue details fetched from the code host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueContext {
    pub number: u64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Open pull request associated with an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Input to the formal spec generator.
#[derive(Debug, Clone, Serialize)]
pub struct SpecContext {
    pub repo: String,
    pub issue: IssueContext,
    pub commit_baseline: String,
}

/// Output of the formal spec generator: the parsed spec plus the raw YAML
/// that gets persisted verbatim.
#[derive(Debug, Clone)]
pub struct SpecBundle {
    pub spec: FormalSpec,
    pub raw_yaml: String,
}

/// Input to one subtask execution.
#[derive(Debug, Clone, Serialize)]
pub struct TaskContext {
    pub repo: String,
    pub run_id: String,
    pub task_key: String,
    pub title: String,
    pub owner_role: String,
    pub definition_of_done: Vec<String>,
    pub spec_yaml: String,
    pub attempt_number: u32,
}

/// Input to the review summarizer.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewContext {
    pub repo: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    pub spec_yaml: String,
    pub task_summaries: Vec<String>,
}

/// Input to the merge-decision generator.
#[derive(Debug, Clone, Serialize)]
pub struct MergeContext {
    pub repo: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks_passed: Option<bool>,
    pub review_summary: String,
}

#[async_trait]
pub trait SpecGenerator: Send + Sync {
    async fn generate_formal_spec(&self, context: &SpecContext) -> Result<SpecBundle>;
}

#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    async fn execute_subtask(&self, context: &TaskContext) -> Result<AgentResult>;
}

#[async_trait]
pub trait ReviewSummarizer: Send + Sync {
    async fn summarize_review(&self, context: &ReviewContext) -> Result<String>;
}

#[async_trait]
pub trait MergeDecisionGenerator: Send + Sync {
    async fn generate_merge_decision(&self, context: &MergeContext) -> Result<MergeDecision>;
}

/// Operations the orchestrator needs from the source-code host. Every call
/// goes through the boundary wrapper; failures are classified.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn get_issue_context(&self, owner: &str, repo: &str, number: u64)
        -> Result<IssueContext>;
    async fn get_branch_sha(&self, owner: &str, repo: &str, branch: &str) -> Result<String>;
    async fn find_open_pull_request_for_issue(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
    ) -> Result<Option<PullRequestRef>>;
    async fn has_required_checks_passed(&self, owner: &str, repo: &str, pr: u64) -> Result<bool>;
    async fn add_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        body: &str,
    ) -> Result<()>;
    async fn approve_pull_request(&self, owner: &str, repo: &str, pr: u64) -> Result<()>;
    async fn enable_auto_merge(&self, owner: &str, repo: &str, pr: u64) -> Result<()>;
    async fn request_changes(&self, owner: &str, repo: &str, pr: u64, body: &str) -> Result<()>;
}

/// Map transport-level reqwest failures onto the error taxonomy. Status-code
/// mapping happens at the call sites once the response status is known.
pub(crate) fn transport_err(service: &str, err: reqwest::Error) -> OrchestratorError {
    if err.is_timeout() {
        OrchestratorError::Timeout(format!("{service}: {err}"))
    } else if err.is_connect() {
        OrchestratorError::Connection(format!("{service}: {err}"))
    } else {
        OrchestratorError::Other(format!("{service}: {err}"))
    }
}

/// Build an UpstreamStatus error with a truncated body excerpt.
pub(crate) fn status_err(service: &str, status: u16, body: &str) -> OrchestratorError {
    let mut message = body.trim().to_string();
    if message.len() > 300 {
        message = message.chars().take(300).collect();
    }
    OrchestratorError::UpstreamStatus {
        service: service.to_string(),
        status,
        message,
    }
}
