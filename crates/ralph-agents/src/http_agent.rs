// Agent Service Adapter
// JSON-over-HTTP client for the spec generator, subtask executor, review
// summarizer, and merge-decision generator. The orchestrator never sees how
// these reach their model providers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use ralph_core::{OrchestratorError, Result};
use ralph_types::{AgentResult, FormalSpec, MergeDecision};

use crate::{
    status_err, transport_err, MergeContext, MergeDecisionGenerator, ReviewContext,
    ReviewSummarizer, SpecBundle, SpecContext, SpecGenerator, SubtaskExecutor, TaskContext,
};

const SERVICE: &str = "agent";

#[derive(Debug, Deserialize)]
struct SpecResponse {
    raw_yaml: String,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    summary: String,
}

pub struct HttpAgentService {
    client: Client,
    base_url: String,
}

impl HttpAgentService {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| OrchestratorError::Other(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: serde::Serialize>(&self, path: &str, payload: &T) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_err(SERVICE, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_err(SERVICE, e))?;
        if !status.is_success() {
            return Err(status_err(SERVICE, status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| OrchestratorError::Validation(format!("agent response: {e}")))
    }
}

#[async_trait]
impl SpecGenerator for HttpAgentService {
    async fn generate_formal_spec(&self, context: &SpecContext) -> Result<SpecBundle> {
        let value = self.post("/v1/spec", context).await?;
        let response: SpecResponse = serde_json::from_value(value)
            .map_err(|e| OrchestratorError::Validation(format!("spec response: {e}")))?;
        let spec = FormalSpec::from_yaml(&response.raw_yaml)?;
        Ok(SpecBundle {
            spec,
            raw_yaml: response.raw_yaml,
        })
    }
}

#[async_trait]
impl SubtaskExecutor for HttpAgentService {
    async fn execute_subtask(&self, context: &TaskContext) -> Result<AgentResult> {
        let value = self.post("/v1/execute", context).await?;
        serde_json::from_value(value)
            .map_err(|e| OrchestratorError::Validation(format!("agent result: {e}")))
    }
}

#[async_trait]
impl ReviewSummarizer for HttpAgentService {
    async fn summarize_review(&self, context: &ReviewContext) -> Result<String> {
        let value = self.post("/v1/review", context).await?;
        let response: ReviewResponse = serde_json::from_value(value)
            .map_err(|e| OrchestratorError::Validation(format!("review response: {e}")))?;
        Ok(response.summary)
    }
}

#[async_trait]
impl MergeDecisionGenerator for HttpAgentService {
    async fn generate_merge_decision(&self, context: &MergeContext) -> Result<MergeDecision> {
        let value = self.post("/v1/merge-decision", context).await?;
        serde_json::from_value(value)
            .map_err(|e| OrchestratorError::Validation(format!("merge decision: {e}")))
    }
}
