// Event Envelope Mapper
// Translates provider-specific webhook payloads into the versioned internal
// envelope. Downstream components consume only the envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENVELOPE_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: String,
    pub event_type: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: EnvelopeSource,
    pub actor: EnvelopeActor,
    pub task_ref: TaskRef,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSource {
    pub system: String,
    pub repo: String,
    pub delivery_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeActor {
    #[serde(rename = "type")]
    pub kind: String,
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRef {
    pub kind: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Event/action pairs that start a workflow run. Everything else is ignored
/// with reason `event_not_actionable`.
pub fn is_actionable_event(event_name: &str, payload: &Value) -> bool {
    let action = payload.get("action").and_then(Value::as_str).unwrap_or("");
    match event_name {
        "issues" => matches!(action, "opened" | "reopened" | "labeled"),
        "pull_request" => matches!(action, "opened" | "synchronize" | "reopened"),
        "projects_v2_item" => matches!(action, "created" | "edited"),
        _ => false,
    }
}

/// Numeric task reference by documented precedence:
/// issue, then pull request, then project item.
pub fn extract_task_ref(payload: &Value) -> Option<TaskRef> {
    if let Some(number) = payload
        .get("issue")
        .and_then(|issue| issue.get("number"))
        .and_then(Value::as_u64)
    {
        return Some(TaskRef {
            kind: "issue".to_string(),
            id: number,
            url: payload
                .get("issue")
                .and_then(|issue| issue.get("html_url"))
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
    if let Some(number) = payload
        .get("pull_request")
        .and_then(|pr| pr.get("number"))
        .and_then(Value::as_u64)
    {
        return Some(TaskRef {
            kind: "pull_request".to_string(),
            id: number,
            url: payload
                .get("pull_request")
                .and_then(|pr| pr.get("html_url"))
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
    if let Some(number) = payload
        .get("projects_v2_item")
        .and_then(|item| item.get("content_number"))
        .and_then(Value::as_u64)
    {
        return Some(TaskRef {
            kind: "project_item".to_string(),
            id: number,
            url: None,
        });
    }
    None
}

pub fn extract_issue_number(payload: &Value) -> Option<u64> {
    extract_task_ref(payload).map(|task_ref| task_ref.id)
}

/// Build the internal envelope for a verified delivery. Returns None when no
/// numeric task reference can be derived from the payload shape.
pub fn map_envelope(event_name: &str, delivery_id: &str, payload: &Value) -> Option<Envelope> {
    let task_ref = extract_task_ref(payload)?;
    let repo = payload
        .get("repository")
        .and_then(|repo| repo.get("full_name"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let sender = payload.get("sender");
    let actor = EnvelopeActor {
        kind: sender
            .and_then(|s| s.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("user")
            .to_ascii_lowercase(),
        login: sender
            .and_then(|s| s.get("login"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    };
    Some(Envelope {
        schema_version: ENVELOPE_SCHEMA_VERSION.to_string(),
        event_type: event_name.to_string(),
        event_id: uuid::Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        source: EnvelopeSource {
            system: "github".to_string(),
            repo,
            delivery_id: delivery_id.to_string(),
        },
        actor,
        task_ref,
        payload: payload.clone(),
    })
}

/// Split a `repository.full_name` into owner and repo halves.
pub fn split_repo(full_name: &str) -> (String, String) {
    match full_name.split_once('/') {
        Some((owner, name)) => (owner.to_string(), name.to_string()),
        None => (String::new(), full_name.to_string()),
    }
}
