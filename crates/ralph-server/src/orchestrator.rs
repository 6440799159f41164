// Orchestrator Service
// Drains the event queue one envelope at a time and drives each workflow run
// end to end: spec generation, task DAG execution, review, merge decision,
// and PR mutation. Any unrecovered error dead-letters the run.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use ralph_agents::{
    CodeHost, MergeContext, MergeDecisionGenerator, ReviewContext, ReviewSummarizer, SpecBundle,
    SpecContext, SpecGenerator, SubtaskExecutor, TaskContext,
};
use ralph_core::{classify, with_retry, OrchestratorError, Result};
use ralph_observability::{with_boundary, BoundaryContext};
use ralph_redact::redact_text;
use ralph_store::{NewArtifact, NewAttempt, WorkflowStore};
use ralph_types::{
    artifact_kind, AgentResultStatus, AttemptCategory, AttemptStatus, MergeVerdict, RunStatus,
    Stage, Task, TaskStatus, WorkflowRun,
};
use ralph_wire::{split_repo, Envelope};

use crate::config::RalphConfig;

/// The four opaque callables the orchestrator composes.
pub struct AgentSuite {
    pub spec_generator: Arc<dyn SpecGenerator>,
    pub executor: Arc<dyn SubtaskExecutor>,
    pub reviewer: Arc<dyn ReviewSummarizer>,
    pub merge_decider: Arc<dyn MergeDecisionGenerator>,
}

pub struct OrchestratorService {
    store: Arc<WorkflowStore>,
    host: Arc<dyn CodeHost>,
    agents: AgentSuite,
    config: Arc<RalphConfig>,
    shutdown: CancellationToken,
}

impl OrchestratorService {
    pub fn new(
        store: Arc<WorkflowStore>,
        host: Arc<dyn CodeHost>,
        agents: AgentSuite,
        config: Arc<RalphConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            host,
            agents,
            config,
            shutdown,
        }
    }

    /// Process one dequeued envelope to completion. Never propagates: the
    /// failure path dead-letters the run and the duration histogram is
    /// observed on every path.
    pub async fn handle_event(&self, envelope: Envelope) {
        let started = Instant::now();
        let mut run_id: Option<String> = None;
        let result = self.process_event(&envelope, &mut run_id).await;

        match result {
            Ok(status) => {
                metrics::counter!("ralph_workflow_runs_total", "status" => status.as_str())
                    .increment(1);
                tracing::info!(
                    event_id = %envelope.event_id,
                    run_id = run_id.as_deref().unwrap_or(""),
                    status = status.as_str(),
                    "workflow run finished"
                );
            }
            Err(OrchestratorError::Cancelled(reason)) => {
                // Shutdown mid-run: persisted state is valid history and the
                // next boot may inspect it. The event stays unprocessed.
                tracing::warn!(
                    event_id = %envelope.event_id,
                    run_id = run_id.as_deref().unwrap_or(""),
                    reason = %reason,
                    "workflow run interrupted by shutdown"
                );
            }
            Err(error) => {
                self.dead_letter(&envelope, run_id.as_deref(), &error).await;
            }
        }

        metrics::histogram!("ralph_workflow_run_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
    }

    async fn process_event(
        &self,
        envelope: &Envelope,
        run_id_slot: &mut Option<String>,
    ) -> Result<RunStatus> {
        let (owner, repo_name) = split_repo(&envelope.source.repo);
        let issue_number = envelope.task_ref.id;
        let external_ref = format!("{}:{}", envelope.task_ref.kind, envelope.task_ref.id);

        // 1. Create the run and link the event to it.
        let ctx = BoundaryContext::new()
            .with_event(&envelope.event_id)
            .with_issue(issue_number);
        let run = with_boundary(
            "repo.create_run",
            &ctx,
            self.store.create_workflow_run(&external_ref, Some(issue_number)),
        )
        .await?;
        *run_id_slot = Some(run.id.clone());
        let ctx = ctx.with_run(&run.id);
        self.store.link_event_to_run(&envelope.event_id, &run.id).await?;

        // 2. Fetch issue context and the baseline commit.
        let issue = with_boundary(
            "host.issue_context",
            &ctx,
            self.host.get_issue_context(&owner, &repo_name, issue_number),
        )
        .await?;
        let baseline = with_boundary(
            "host.branch_sha",
            &ctx,
            self.host
                .get_branch_sha(&owner, &repo_name, &self.config.default_branch),
        )
        .await?;

        // 3. Generate, validate, and persist the formal spec.
        let bundle = self.generate_spec(&ctx, envelope, issue, baseline).await?;
        let spec = with_boundary(
            "repo.store_spec",
            &ctx,
            self.store
                .store_spec(&run.id, &bundle.spec.spec_id, &bundle.raw_yaml),
        )
        .await?;
        self.store
            .add_artifact(NewArtifact {
                workflow_run_id: &run.id,
                task_id: None,
                kind: artifact_kind::FORMAL_SPEC,
                content: &bundle.raw_yaml,
                metadata: Some(&json!({ "spec_id": spec.spec_id })),
            })
            .await?;

        // 4. Create the task DAG and dispatch.
        with_boundary(
            "repo.create_tasks",
            &ctx,
            self.store.create_tasks(&run.id, &spec.work_breakdown),
        )
        .await?;
        self.store
            .update_run_stage(&run.id, Stage::SubtasksDispatched, None)
            .await?;

        // 5. Execute the runnable frontier until it drains.
        self.run_task_loop(&ctx, &run, &bundle.raw_yaml, &envelope.source.repo)
            .await?;

        // 6. Review summary.
        self.store
            .update_run_stage(&run.id, Stage::PrReviewed, None)
            .await?;
        let tasks = self.store.list_tasks(&run.id).await?;
        let review_ctx = ReviewContext {
            repo: envelope.source.repo.clone(),
            run_id: run.id.clone(),
            pr_number: None,
            spec_yaml: bundle.raw_yaml.clone(),
            task_summaries: task_summaries(&tasks),
        };
        let review = with_boundary(
            "review.summarize",
            &ctx,
            self.agents.reviewer.summarize_review(&review_ctx),
        )
        .await?;
        self.store
            .add_artifact(NewArtifact {
                workflow_run_id: &run.id,
                task_id: None,
                kind: artifact_kind::REVIEW_SUMMARY,
                content: &review,
                metadata: None,
            })
            .await?;

        // 7. Resolve the PR, evaluate checks, and decide.
        let pr = with_boundary(
            "host.find_pull_request",
            &ctx,
            self.host
                .find_open_pull_request_for_issue(&owner, &repo_name, issue_number),
        )
        .await?;
        if let Some(pr) = &pr {
            self.store.set_run_pr_number(&run.id, pr.number).await?;
        }
        let checks_passed = match &pr {
            Some(pr) => Some(
                with_boundary(
                    "host.required_checks",
                    &ctx,
                    self.host
                        .has_required_checks_passed(&owner, &repo_name, pr.number),
                )
                .await?,
            ),
            None => None,
        };
        let merge_ctx = MergeContext {
            repo: envelope.source.repo.clone(),
            run_id: run.id.clone(),
            pr_number: pr.as_ref().map(|p| p.number),
            checks_passed,
            review_summary: review.clone(),
        };
        let decision = with_boundary(
            "merge.decide",
            &ctx,
            self.agents.merge_decider.generate_merge_decision(&merge_ctx),
        )
        .await?;
        self.store
            .add_merge_decision(&run.id, pr.as_ref().map(|p| p.number), &decision)
            .await?;

        // 8. Mutate the PR (or explain next steps on the issue).
        match &pr {
            Some(pr) => match decision.decision {
                MergeVerdict::Approve => {
                    with_boundary(
                        "host.approve",
                        &ctx,
                        self.host.approve_pull_request(&owner, &repo_name, pr.number),
                    )
                    .await?;
                    if checks_passed == Some(true) && self.config.auto_merge_enabled {
                        with_boundary(
                            "host.auto_merge",
                            &ctx,
                            self.host.enable_auto_merge(&owner, &repo_name, pr.number),
                        )
                        .await?;
                    }
                }
                MergeVerdict::RequestChanges | MergeVerdict::Block => {
                    let body = redact_text(&changes_requested_body(&decision.rationale, &decision.blocking_findings));
                    with_boundary(
                        "host.request_changes",
                        &ctx,
                        self.host
                            .request_changes(&owner, &repo_name, pr.number, &body),
                    )
                    .await?;
                }
            },
            None => {
                let body = redact_text(&issue_comment_body(&decision.decision, &decision.rationale));
                with_boundary(
                    "host.issue_comment",
                    &ctx,
                    self.host
                        .add_issue_comment(&owner, &repo_name, issue_number, &body),
                )
                .await?;
            }
        }

        // 9. Finalize.
        self.store
            .update_run_stage(&run.id, Stage::MergeDecision, None)
            .await?;
        let pending = self.store.count_pending_tasks(&run.id).await?;
        let status = if pending == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.store.mark_run_status(&run.id, status, None).await?;

        // 10. Close out the event.
        self.store
            .mark_event_processed(&envelope.event_id, None)
            .await?;

        Ok(status)
    }

    async fn generate_spec(
        &self,
        ctx: &BoundaryContext,
        envelope: &Envelope,
        issue: ralph_agents::IssueContext,
        commit_baseline: String,
    ) -> Result<SpecBundle> {
        let spec_ctx = SpecContext {
            repo: envelope.source.repo.clone(),
            issue,
            commit_baseline,
        };
        let policy = self.config.spec_retry.policy();
        let outcome = with_boundary("spec.generate", ctx, async {
            with_retry("spec.generate", &policy, &self.shutdown, |_| {
                let spec_ctx = &spec_ctx;
                async move { self.agents.spec_generator.generate_formal_spec(spec_ctx).await }
            })
            .await
        })
        .await?;
        Ok(outcome.value)
    }

    /// Execute runnable tasks until the frontier is empty. Each outer
    /// execution records exactly one AgentAttempt; a retry-exhausted task is
    /// re-queued until the per-task attempt ceiling forces it to blocked.
    async fn run_task_loop(
        &self,
        ctx: &BoundaryContext,
        run: &WorkflowRun,
        spec_yaml: &str,
        repo: &str,
    ) -> Result<()> {
        loop {
            let frontier = self.store.list_runnable_tasks(&run.id).await?;
            if frontier.is_empty() {
                break;
            }
            for task in frontier {
                if self.shutdown.is_cancelled() {
                    return Err(OrchestratorError::Cancelled(
                        "task loop interrupted".to_string(),
                    ));
                }
                self.execute_task(ctx, run, &task, spec_yaml, repo).await?;
            }
        }
        Ok(())
    }

    async fn execute_task(
        &self,
        ctx: &BoundaryContext,
        run: &WorkflowRun,
        task: &Task,
        spec_yaml: &str,
        repo: &str,
    ) -> Result<()> {
        self.store.mark_task_running(&task.id).await?;

        // Outer attempt numbering: one AgentAttempt per retry-budget trip,
        // never the engine's inner counter.
        let attempt_number = task.attempt_count + 1;
        let task_ctx = TaskContext {
            repo: repo.to_string(),
            run_id: run.id.clone(),
            task_key: task.task_key.clone(),
            title: task.title.clone(),
            owner_role: task.owner_role.clone(),
            definition_of_done: task.definition_of_done.clone(),
            spec_yaml: spec_yaml.to_string(),
            attempt_number,
        };
        let task_boundary = ctx.clone().with_task(&task.task_key);
        let policy = self.config.task_retry.policy();

        let started = Instant::now();
        let outcome = with_boundary("task.execute", &task_boundary, async {
            with_retry("task.execute", &policy, &self.shutdown, |_| {
                let task_ctx = &task_ctx;
                async move { self.agents.executor.execute_subtask(task_ctx).await }
            })
            .await
        })
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(retry_outcome) => {
                let result = retry_outcome.value;
                let output = serde_json::to_value(&result).map_err(|e| {
                    OrchestratorError::Validation(format!("agent result serialization: {e}"))
                })?;
                let (attempt_status, next_status) = match result.status {
                    AgentResultStatus::Completed => (AttemptStatus::Completed, TaskStatus::Completed),
                    AgentResultStatus::NeedsReview => {
                        (AttemptStatus::NeedsReview, TaskStatus::Completed)
                    }
                    AgentResultStatus::Blocked => (AttemptStatus::Blocked, TaskStatus::Blocked),
                };
                self.store
                    .add_agent_attempt(NewAttempt {
                        task_id: &task.id,
                        agent_role: &task.owner_role,
                        attempt_number,
                        status: attempt_status,
                        output: Some(&output),
                        error: None,
                        error_category: AttemptCategory::Unknown,
                        backoff_delay_ms: retry_outcome.last_backoff_ms,
                        duration_ms,
                    })
                    .await?;
                self.store
                    .mark_task_result(&task.id, &output, next_status)
                    .await?;
                self.store
                    .add_artifact(NewArtifact {
                        workflow_run_id: &run.id,
                        task_id: Some(&task.id),
                        kind: artifact_kind::AGENT_RESULT,
                        content: &result.summary,
                        metadata: Some(&output),
                    })
                    .await?;
            }
            Err(error @ OrchestratorError::Cancelled(_)) => return Err(error),
            Err(error) => {
                let category = classify(&error).attempt_category();
                let backoff = match &error {
                    OrchestratorError::RetryExhausted {
                        last_backoff_ms, ..
                    } => *last_backoff_ms,
                    _ => None,
                };
                let message = error.to_string();
                self.store
                    .add_agent_attempt(NewAttempt {
                        task_id: &task.id,
                        agent_role: &task.owner_role,
                        attempt_number,
                        status: AttemptStatus::Failed,
                        output: None,
                        error: Some(&message),
                        error_category: category,
                        backoff_delay_ms: backoff,
                        duration_ms,
                    })
                    .await?;

                let ceiling_hit = attempt_number >= self.config.max_task_attempts;
                let next_status = if ceiling_hit {
                    TaskStatus::Blocked
                } else {
                    TaskStatus::Retry
                };
                let summary = json!({
                    "summary": format!("attempt {attempt_number} failed: {message}"),
                    "status": "blocked"
                });
                self.store
                    .mark_task_result(&task.id, &summary, next_status)
                    .await?;

                if ceiling_hit {
                    self.store
                        .add_artifact(NewArtifact {
                            workflow_run_id: &run.id,
                            task_id: Some(&task.id),
                            kind: artifact_kind::TASK_BLOCKED,
                            content: &format!(
                                "task {} blocked after {} attempts: {}",
                                task.task_key, attempt_number, message
                            ),
                            metadata: None,
                        })
                        .await?;
                    tracing::warn!(
                        run_id = %run.id,
                        task_key = %task.task_key,
                        attempts = attempt_number,
                        "task hit the attempt ceiling and was blocked"
                    );
                }
            }
        }

        Ok(())
    }

    /// The handler's failure path: mark the run dead-letter with a redacted
    /// reason, mark the event processed with the same reason, and count it.
    async fn dead_letter(
        &self,
        envelope: &Envelope,
        run_id: Option<&str>,
        error: &OrchestratorError,
    ) {
        let reason = redact_text(&error.to_string());
        if let Some(run_id) = run_id {
            if let Err(mark_err) = self
                .store
                .mark_run_status(run_id, RunStatus::DeadLetter, Some(&reason))
                .await
            {
                tracing::error!(
                    run_id,
                    error = %mark_err,
                    "failed to mark run dead-letter"
                );
            }
        }
        if let Err(mark_err) = self
            .store
            .mark_event_processed(&envelope.event_id, Some(&reason))
            .await
        {
            tracing::error!(
                event_id = %envelope.event_id,
                error = %mark_err,
                "failed to mark event processed"
            );
        }
        metrics::counter!("ralph_workflow_runs_total", "status" => "dead_letter").increment(1);
        tracing::error!(
            event_id = %envelope.event_id,
            run_id = run_id.unwrap_or(""),
            category = classify(error).as_str(),
            reason = %reason,
            "workflow run dead-lettered"
        );
    }
}

fn task_summaries(tasks: &[Task]) -> Vec<String> {
    tasks
        .iter()
        .filter_map(|task| {
            task.last_result
                .as_ref()
                .and_then(|result| result.get("summary"))
                .and_then(Value::as_str)
                .map(|summary| format!("{}: {}", task.task_key, summary))
        })
        .collect()
}

fn changes_requested_body(rationale: &str, findings: &[String]) -> String {
    let mut body = format!("Changes requested by the review agent.\n\n{rationale}\n");
    if !findings.is_empty() {
        body.push_str("\nBlocking findings:\n");
        for finding in findings {
            body.push_str(&format!("- {finding}\n"));
        }
    }
    body
}

fn issue_comment_body(verdict: &MergeVerdict, rationale: &str) -> String {
    format!(
        "No open pull request was found for this task. The review verdict is \
         `{}`.\n\n{}\n\nOpen a pull request referencing this issue to continue.",
        verdict.as_str(),
        rationale
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ralph_agents::{IssueContext, PullRequestRef};
    use ralph_store::NewEvent;
    use ralph_types::MergeDecision;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    const SPEC_YAML: &str = r#"
spec_version: 1
spec_id: spec-1
source:
  github:
    repo: acme/widgets
    issue: 123
    commit_baseline: abc123
objective: Build the widget endpoint
acceptance_criteria:
  - returns 200
work_breakdown:
  - id: t1
    title: Add route
    owner_role: implementer
  - id: t2
    title: Add tests
    owner_role: tester
    depends_on: [t1]
"#;

    struct MockHost {
        pr: Option<PullRequestRef>,
        checks_passed: bool,
        calls: Mutex<Vec<String>>,
    }

    impl MockHost {
        fn new(pr: Option<PullRequestRef>, checks_passed: bool) -> Self {
            Self {
                pr,
                checks_passed,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CodeHost for MockHost {
        async fn get_issue_context(
            &self,
            _owner: &str,
            _repo: &str,
            number: u64,
        ) -> Result<IssueContext> {
            Ok(IssueContext {
                number,
                title: "Build the widget endpoint".to_string(),
                body: "please".to_string(),
                labels: vec!["ralph".to_string()],
                url: None,
            })
        }

        async fn get_branch_sha(&self, _owner: &str, _repo: &str, _branch: &str) -> Result<String> {
            Ok("abc123".to_string())
        }

        async fn find_open_pull_request_for_issue(
            &self,
            _owner: &str,
            _repo: &str,
            _issue: u64,
        ) -> Result<Option<PullRequestRef>> {
            Ok(self.pr.clone())
        }

        async fn has_required_checks_passed(
            &self,
            _owner: &str,
            _repo: &str,
            _pr: u64,
        ) -> Result<bool> {
            Ok(self.checks_passed)
        }

        async fn add_issue_comment(
            &self,
            _owner: &str,
            _repo: &str,
            _issue: u64,
            body: &str,
        ) -> Result<()> {
            self.record(format!("comment:{body}"));
            Ok(())
        }

        async fn approve_pull_request(&self, _owner: &str, _repo: &str, pr: u64) -> Result<()> {
            self.record(format!("approve:{pr}"));
            Ok(())
        }

        async fn enable_auto_merge(&self, _owner: &str, _repo: &str, pr: u64) -> Result<()> {
            self.record(format!("auto_merge:{pr}"));
            Ok(())
        }

        async fn request_changes(
            &self,
            _owner: &str,
            _repo: &str,
            pr: u64,
            body: &str,
        ) -> Result<()> {
            self.record(format!("request_changes:{pr}:{body}"));
            Ok(())
        }
    }

    struct MockSpecGen {
        fail_with: Option<fn() -> OrchestratorError>,
    }

    #[async_trait]
    impl SpecGenerator for MockSpecGen {
        async fn generate_formal_spec(&self, _context: &SpecContext) -> Result<SpecBundle> {
            if let Some(make_err) = self.fail_with {
                return Err(make_err());
            }
            Ok(SpecBundle {
                spec: ralph_types::FormalSpec::from_yaml(SPEC_YAML).unwrap(),
                raw_yaml: SPEC_YAML.to_string(),
            })
        }
    }

    /// Fails the first `fail_first` calls per task with a transient error,
    /// or every call with a deterministic one when `deterministic` is set.
    struct MockExecutor {
        fail_first: HashMap<String, u32>,
        deterministic: bool,
        calls: Mutex<HashMap<String, AtomicU32>>,
    }

    impl MockExecutor {
        fn new(fail_first: HashMap<String, u32>) -> Self {
            Self {
                fail_first,
                deterministic: false,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn always_failing() -> Self {
            Self {
                fail_first: HashMap::new(),
                deterministic: true,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn call_count(&self, task_key: &str) -> u32 {
            self.calls
                .lock()
                .unwrap()
                .get(task_key)
                .map(|count| count.load(Ordering::SeqCst))
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl SubtaskExecutor for MockExecutor {
        async fn execute_subtask(&self, context: &TaskContext) -> Result<ralph_types::AgentResult> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls
                    .entry(context.task_key.clone())
                    .or_insert_with(|| AtomicU32::new(0))
                    .fetch_add(1, Ordering::SeqCst)
                    + 1
            };
            if self.deterministic {
                return Err(OrchestratorError::Validation("bad task input".to_string()));
            }
            let budget = self.fail_first.get(&context.task_key).copied().unwrap_or(0);
            if call <= budget {
                return Err(OrchestratorError::Timeout("agent stalled".to_string()));
            }
            Ok(ralph_types::AgentResult {
                task_id: context.task_key.clone(),
                status: AgentResultStatus::Completed,
                summary: format!("{} done", context.task_key),
                files_changed: vec!["src/widget.rs".to_string()],
                commands_ran: Vec::new(),
                open_questions: Vec::new(),
                handoff_notes: None,
            })
        }
    }

    struct MockReviewer;

    #[async_trait]
    impl ReviewSummarizer for MockReviewer {
        async fn summarize_review(&self, _context: &ReviewContext) -> Result<String> {
            Ok("all acceptance criteria met".to_string())
        }
    }

    struct MockDecider {
        decision: MergeVerdict,
    }

    #[async_trait]
    impl MergeDecisionGenerator for MockDecider {
        async fn generate_merge_decision(&self, _context: &MergeContext) -> Result<MergeDecision> {
            Ok(MergeDecision {
                decision: self.decision,
                rationale: "review verdict".to_string(),
                blocking_findings: if self.decision == MergeVerdict::Approve {
                    Vec::new()
                } else {
                    vec!["missing tests".to_string()]
                },
            })
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<WorkflowStore>,
        host: Arc<MockHost>,
        executor: Arc<MockExecutor>,
        service: OrchestratorService,
    }

    async fn harness(
        host: MockHost,
        spec_gen: MockSpecGen,
        executor: MockExecutor,
        decision: MergeVerdict,
        auto_merge: bool,
    ) -> Harness {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            WorkflowStore::open(&dir.path().join("ralph.db"))
                .await
                .unwrap(),
        );
        let mut config = RalphConfig::default();
        config.auto_merge_enabled = auto_merge;
        config.spec_retry.base_delay_ms = 1;
        config.spec_retry.max_delay_ms = 2;
        config.task_retry.base_delay_ms = 1;
        config.task_retry.max_delay_ms = 2;
        let host = Arc::new(host);
        let executor = Arc::new(executor);
        let service = OrchestratorService::new(
            store.clone(),
            host.clone(),
            AgentSuite {
                spec_generator: Arc::new(spec_gen),
                executor: executor.clone(),
                reviewer: Arc::new(MockReviewer),
                merge_decider: Arc::new(MockDecider { decision }),
            },
            Arc::new(config),
            CancellationToken::new(),
        );
        Harness {
            _dir: dir,
            store,
            host,
            executor,
            service,
        }
    }

    async fn recorded_envelope(store: &WorkflowStore) -> Envelope {
        let payload = serde_json::json!({
            "action": "opened",
            "issue": {"number": 123},
            "repository": {"full_name": "acme/widgets"},
            "sender": {"login": "octocat", "type": "User"}
        });
        let envelope = ralph_wire::map_envelope("issues", "delivery-1", &payload).unwrap();
        store
            .record_event_if_new(NewEvent {
                event_id: &envelope.event_id,
                delivery_id: &envelope.source.delivery_id,
                event_type: &envelope.event_type,
                source_owner: "acme",
                source_repo: "widgets",
                payload: &envelope.payload,
            })
            .await
            .unwrap();
        envelope
    }

    fn open_pr() -> PullRequestRef {
        PullRequestRef {
            number: 7,
            head_sha: Some("deadbeef".to_string()),
            url: None,
        }
    }

    #[tokio::test]
    async fn happy_path_completes_the_run() {
        let h = harness(
            MockHost::new(Some(open_pr()), true),
            MockSpecGen { fail_with: None },
            MockExecutor::new(HashMap::new()),
            MergeVerdict::Approve,
            true,
        )
        .await;
        let envelope = recorded_envelope(&h.store).await;
        h.service.handle_event(envelope.clone()).await;

        let runs = h.store.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.current_stage, Stage::MergeDecision);
        assert_eq!(run.pr_number, Some(7));

        let stages: Vec<Stage> = h
            .store
            .list_stage_transitions(&run.id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.to_stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                Stage::SpecGenerated,
                Stage::SubtasksDispatched,
                Stage::PrReviewed,
                Stage::MergeDecision,
            ]
        );

        let tasks = h.store.list_tasks(&run.id).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
        assert!(tasks.iter().all(|t| t.attempt_count == 1));

        let kinds: Vec<String> = h
            .store
            .list_artifacts(&run.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.kind.clone())
            .collect();
        assert!(kinds.contains(&artifact_kind::FORMAL_SPEC.to_string()));
        assert!(kinds.contains(&artifact_kind::REVIEW_SUMMARY.to_string()));
        assert_eq!(
            kinds
                .iter()
                .filter(|k| k.as_str() == artifact_kind::AGENT_RESULT)
                .count(),
            2
        );

        assert_eq!(
            h.host.calls(),
            vec!["approve:7".to_string(), "auto_merge:7".to_string()]
        );

        let event = h.store.get_event(&envelope.event_id).await.unwrap();
        assert!(event.processed);
        assert!(event.error.is_none());
        assert_eq!(event.workflow_run_id.as_deref(), Some(run.id.as_str()));
    }

    #[tokio::test]
    async fn outer_attempt_numbering_across_retry_budgets() {
        // t1 fails three times: one full retry budget (2 retries = 3 calls),
        // then succeeds on the next outer attempt.
        let h = harness(
            MockHost::new(Some(open_pr()), true),
            MockSpecGen { fail_with: None },
            MockExecutor::new(HashMap::from([("t1".to_string(), 3)])),
            MergeVerdict::Approve,
            false,
        )
        .await;
        let envelope = recorded_envelope(&h.store).await;
        h.service.handle_event(envelope).await;

        let run = &h.store.list_runs(1).await.unwrap()[0];
        assert_eq!(run.status, RunStatus::Completed);

        let tasks = h.store.list_tasks(&run.id).await.unwrap();
        let t1 = tasks.iter().find(|t| t.task_key == "t1").unwrap();
        assert_eq!(t1.status, TaskStatus::Completed);
        assert_eq!(t1.attempt_count, 2);

        let attempts = h.store.list_attempts(&t1.id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].attempt_number, 1);
        assert_eq!(attempts[0].status, AttemptStatus::Failed);
        assert_eq!(attempts[0].error_category, AttemptCategory::Transient);
        assert!(attempts[0].backoff_delay_ms.is_some());
        assert_eq!(attempts[1].attempt_number, 2);
        assert_eq!(attempts[1].status, AttemptStatus::Completed);

        // 3 failing calls in the first budget + 1 success in the second.
        assert_eq!(h.executor.call_count("t1"), 4);
    }

    #[tokio::test]
    async fn deterministic_task_failure_blocks_at_the_attempt_ceiling() {
        let h = harness(
            MockHost::new(None, false),
            MockSpecGen { fail_with: None },
            MockExecutor::always_failing(),
            MergeVerdict::Block,
            false,
        )
        .await;
        let envelope = recorded_envelope(&h.store).await;
        h.service.handle_event(envelope).await;

        let run = &h.store.list_runs(1).await.unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);

        let tasks = h.store.list_tasks(&run.id).await.unwrap();
        let t1 = tasks.iter().find(|t| t.task_key == "t1").unwrap();
        assert_eq!(t1.status, TaskStatus::Blocked);
        assert_eq!(t1.attempt_count, 5);

        let attempts = h.store.list_attempts(&t1.id).await.unwrap();
        assert_eq!(attempts.len(), 5);
        assert!(attempts
            .iter()
            .all(|a| a.error_category == AttemptCategory::Deterministic));
        // Deterministic errors never consume inner retries.
        assert_eq!(h.executor.call_count("t1"), 5);

        // t2 never ran: its dependency is blocked, not completed.
        let t2 = tasks.iter().find(|t| t.task_key == "t2").unwrap();
        assert_eq!(t2.status, TaskStatus::Queued);
        assert_eq!(h.executor.call_count("t2"), 0);

        let kinds: Vec<String> = h
            .store
            .list_artifacts(&run.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.kind.clone())
            .collect();
        assert!(kinds.contains(&artifact_kind::TASK_BLOCKED.to_string()));
    }

    #[tokio::test]
    async fn spec_generator_validation_failure_dead_letters_the_run() {
        let h = harness(
            MockHost::new(None, false),
            MockSpecGen {
                fail_with: Some(|| OrchestratorError::Validation("spec schema rejected".into())),
            },
            MockExecutor::new(HashMap::new()),
            MergeVerdict::Approve,
            false,
        )
        .await;
        let envelope = recorded_envelope(&h.store).await;
        h.service.handle_event(envelope.clone()).await;

        let run = &h.store.list_runs(1).await.unwrap()[0];
        assert_eq!(run.status, RunStatus::DeadLetter);
        assert_eq!(run.current_stage, Stage::DeadLetter);
        assert!(run
            .dead_letter_reason
            .as_deref()
            .unwrap()
            .contains("spec schema rejected"));

        let transitions = h.store.list_stage_transitions(&run.id).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_stage, Stage::TaskRequested);
        assert_eq!(transitions[0].to_stage, Stage::DeadLetter);

        let event = h.store.get_event(&envelope.event_id).await.unwrap();
        assert!(event.processed);
        assert!(event.error.is_some());
    }

    #[tokio::test]
    async fn request_changes_posts_a_review_with_findings() {
        let h = harness(
            MockHost::new(Some(open_pr()), false),
            MockSpecGen { fail_with: None },
            MockExecutor::new(HashMap::new()),
            MergeVerdict::RequestChanges,
            true,
        )
        .await;
        let envelope = recorded_envelope(&h.store).await;
        h.service.handle_event(envelope).await;

        let calls = h.host.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("request_changes:7:"));
        assert!(calls[0].contains("missing tests"));

        let run = &h.store.list_runs(1).await.unwrap()[0];
        let decisions = h.store.list_merge_decisions(&run.id).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision, MergeVerdict::RequestChanges);
    }

    #[tokio::test]
    async fn missing_pr_posts_an_issue_comment() {
        let h = harness(
            MockHost::new(None, false),
            MockSpecGen { fail_with: None },
            MockExecutor::new(HashMap::new()),
            MergeVerdict::Approve,
            true,
        )
        .await;
        let envelope = recorded_envelope(&h.store).await;
        h.service.handle_event(envelope).await;

        let calls = h.host.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("comment:"));
        assert!(calls[0].contains("No open pull request"));

        let run = &h.store.list_runs(1).await.unwrap()[0];
        assert_eq!(run.pr_number, None);
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn approve_without_auto_merge_flag_skips_auto_merge() {
        let h = harness(
            MockHost::new(Some(open_pr()), true),
            MockSpecGen { fail_with: None },
            MockExecutor::new(HashMap::new()),
            MergeVerdict::Approve,
            false,
        )
        .await;
        let envelope = recorded_envelope(&h.store).await;
        h.service.handle_event(envelope).await;

        assert_eq!(h.host.calls(), vec!["approve:7".to_string()]);
    }
}
