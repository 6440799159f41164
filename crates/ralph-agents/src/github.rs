// GitHub REST Adapter
// Implements the CodeHost contract against the GitHub v3 API. Auto-merge is
// the one GraphQL-only operation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use ralph_core::{OrchestratorError, Result};

use crate::{status_err, transport_err, CodeHost, IssueContext, PullRequestRef};

const SERVICE: &str = "github";
const USER_AGENT: &str = concat!("ralph/", env!("CARGO_PKG_VERSION"));

pub struct GitHubClient {
    client: Client,
    api_base: String,
    graphql_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OrchestratorError::Other(format!("failed to build client: {e}")))?;
        let api_base = api_base.trim_end_matches('/').to_string();
        let graphql_url = format!("{}/graphql", api_base.trim_end_matches("/v3"));
        Ok(Self {
            client,
            api_base,
            graphql_url,
            token: token.to_string(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
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
            .map_err(|e| OrchestratorError::Validation(format!("github response: {e}")))
    }

    async fn post_json(&self, url: &str, payload: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
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
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| OrchestratorError::Validation(format!("github response: {e}")))
    }

    async fn pull_request_node_id(&self, owner: &str, repo: &str, pr: u64) -> Result<String> {
        let detail = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls/{pr}"))
            .await?;
        detail
            .get("node_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                OrchestratorError::Validation(format!("pull request {pr} has no node_id"))
            })
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn get_issue_context(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<IssueContext> {
        let issue = self
            .get_json(&format!("/repos/{owner}/{repo}/issues/{number}"))
            .await?;
        Ok(IssueContext {
            number,
            title: issue
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            body: issue
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            labels: issue
                .get("labels")
                .and_then(Value::as_array)
                .map(|labels| {
                    labels
                        .iter()
                        .filter_map(|l| l.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            url: issue
                .get("html_url")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn get_branch_sha(&self, owner: &str, repo: &str, branch: &str) -> Result<String> {
        let detail = self
            .get_json(&format!("/repos/{owner}/{repo}/branches/{branch}"))
            .await?;
        detail
            .get("commit")
            .and_then(|commit| commit.get("sha"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                OrchestratorError::Validation(format!("branch {branch} has no commit sha"))
            })
    }

    async fn find_open_pull_request_for_issue(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
    ) -> Result<Option<PullRequestRef>> {
        let pulls = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls?state=open&per_page=100"))
            .await?;
        let Some(list) = pulls.as_array() else {
            return Ok(None);
        };
        Ok(list
            .iter()
            .find(|pr| pr_references_issue(pr, issue))
            .map(|pr| PullRequestRef {
                number: pr.get("number").and_then(Value::as_u64).unwrap_or(0),
                head_sha: pr
                    .get("head")
                    .and_then(|head| head.get("sha"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                url: pr
                    .get("html_url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }))
    }

    async fn has_required_checks_passed(&self, owner: &str, repo: &str, pr: u64) -> Result<bool> {
        let detail = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls/{pr}"))
            .await?;
        let Some(sha) = detail
            .get("head")
            .and_then(|head| head.get("sha"))
            .and_then(Value::as_str)
        else {
            return Ok(false);
        };
        let status = self
            .get_json(&format!("/repos/{owner}/{repo}/commits/{sha}/status"))
            .await?;
        Ok(status.get("state").and_then(Value::as_str) == Some("success"))
    }

    async fn add_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        body: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{owner}/{repo}/issues/{issue}/comments",
            self.api_base
        );
        self.post_json(&url, &json!({ "body": body })).await?;
        Ok(())
    }

    async fn approve_pull_request(&self, owner: &str, repo: &str, pr: u64) -> Result<()> {
        let url = format!("{}/repos/{owner}/{repo}/pulls/{pr}/reviews", self.api_base);
        self.post_json(&url, &json!({ "event": "APPROVE" })).await?;
        Ok(())
    }

    async fn enable_auto_merge(&self, owner: &str, repo: &str, pr: u64) -> Result<()> {
        let node_id = self.pull_request_node_id(owner, repo, pr).await?;
        let mutation = json!({
            "query": "mutation($id: ID!) { enablePullRequestAutoMerge(input: \
                      {pullRequestId: $id, mergeMethod: SQUASH}) { clientMutationId } }",
            "variables": { "id": node_id }
        });
        let response = self.post_json(&self.graphql_url, &mutation).await?;
        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(OrchestratorError::Validation(format!(
                    "enable auto-merge rejected: {}",
                    errors[0]
                )));
            }
        }
        Ok(())
    }

    async fn request_changes(&self, owner: &str, repo: &str, pr: u64, body: &str) -> Result<()> {
        let url = format!("{}/repos/{owner}/{repo}/pulls/{pr}/reviews", self.api_base);
        self.post_json(&url, &json!({ "event": "REQUEST_CHANGES", "body": body }))
            .await?;
        Ok(())
    }
}

/// A PR belongs to an issue when its title or body references `#<issue>` or
/// its head branch embeds the issue number.
fn pr_references_issue(pr: &Value, issue: u64) -> bool {
    let needle = format!("#{issue}");
    let title = pr.get("title").and_then(Value::as_str).unwrap_or("");
    let body = pr.get("body").and_then(Value::as_str).unwrap_or("");
    if title.contains(&needle) || body.contains(&needle) {
        return true;
    }
    pr.get("head")
        .and_then(|head| head.get("ref"))
        .and_then(Value::as_str)
        .map(|branch| branch_mentions_issue(branch, issue))
        .unwrap_or(false)
}

fn branch_mentions_issue(branch: &str, issue: u64) -> bool {
    branch
        .split(|c: char| !c.is_ascii_digit())
        .filter(|segment| !segment.is_empty())
        .any(|segment| segment.parse::<u64>() == Ok(issue))
}
