use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use ralph_core::OrchestratorError;
use ralph_store::NewEvent;
use ralph_wire::{is_actionable_event, map_envelope, split_repo, verify_signature};

use crate::AppState;

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/github", post(webhook_github))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_text))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_origin(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ralph server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

fn webhook_counter(event_type: &str, result: &str) {
    metrics::counter!(
        "ralph_webhook_events_total",
        "event_type" => event_type.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// The inbound webhook endpoint. The body must stay raw bytes until the
/// signature is verified.
async fn webhook_github(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event_name = header_str(&headers, "x-github-event").map(str::to_string);
    let delivery_id = header_str(&headers, "x-github-delivery").map(str::to_string);
    let (Some(event_name), Some(delivery_id)) = (event_name, delivery_id) else {
        webhook_counter("unknown", "missing_headers");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing required headers" })),
        )
            .into_response();
    };

    let Some(signature) = header_str(&headers, "x-hub-signature-256") else {
        webhook_counter(&event_name, "missing_signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing signature" })),
        )
            .into_response();
    };
    if !verify_signature(&state.config.webhook_secret, &body, signature) {
        webhook_counter(&event_name, "invalid_signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        )
            .into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            webhook_counter(&event_name, "invalid_payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid json body" })),
            )
                .into_response();
        }
    };

    if !is_actionable_event(&event_name, &payload) {
        webhook_counter(&event_name, "ignored");
        return (
            StatusCode::ACCEPTED,
            Json(json!({ "accepted": false, "reason": "event_not_actionable" })),
        )
            .into_response();
    }

    let Some(envelope) = map_envelope(&event_name, &delivery_id, &payload) else {
        webhook_counter(&event_name, "missing_issue_number");
        return (
            StatusCode::ACCEPTED,
            Json(json!({ "accepted": false, "reason": "missing_issue_number" })),
        )
            .into_response();
    };

    let (owner, repo) = split_repo(&envelope.source.repo);
    let recorded = state
        .store
        .record_event_if_new(NewEvent {
            event_id: &envelope.event_id,
            delivery_id: &delivery_id,
            event_type: &event_name,
            source_owner: &owner,
            source_repo: &repo,
            payload: &payload,
        })
        .await;

    let recorded = match recorded {
        Ok(recorded) => recorded,
        Err(error) => {
            webhook_counter(&event_name, "error");
            tracing::error!(%error, delivery_id, "failed to record webhook delivery");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to record delivery" })),
            )
                .into_response();
        }
    };

    if !recorded.inserted {
        webhook_counter(&event_name, "duplicate");
        return (
            StatusCode::OK,
            Json(json!({
                "accepted": false,
                "duplicate": true,
                "eventId": recorded.event_id
            })),
        )
            .into_response();
    }

    // Enqueue only after the insert succeeded, so replays never double-run.
    if let Err(error) = state.queue.enqueue(envelope) {
        webhook_counter(&event_name, "error");
        tracing::error!(%error, delivery_id, "failed to enqueue event");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to enqueue event" })),
        )
            .into_response();
    }

    webhook_counter(&event_name, "accepted");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "eventId": recorded.event_id })),
    )
        .into_response()
}

/// Liveness only: never touches the database.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_ms = (Utc::now() - state.started_at).num_milliseconds().max(0);
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_ms": uptime_ms
    }))
}

async fn readyz(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Err(error) => {
            tracing::warn!(%error, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not_ready" })),
            )
                .into_response()
        }
    }
}

async fn metrics_text() -> Response {
    match ralph_observability::metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "metrics recorder not installed" })),
        )
            .into_response(),
    }
}

async fn list_runs(State(state): State<AppState>) -> Response {
    match state.store.list_runs(state.config.run_list_limit).await {
        Ok(runs) => Json(json!({ "runs": runs })).into_response(),
        Err(error) => error_response(error),
    }
}

/// Full run view: the run, its tasks with attempts, artifacts, merge
/// decisions, and stage transitions. Dead-letter reasons surface verbatim
/// (they were redacted at write time).
async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    let run = match state.store.get_workflow_run(&run_id).await {
        Ok(run) => run,
        Err(error) => return error_response(error),
    };
    let tasks = match state.store.list_tasks(&run_id).await {
        Ok(tasks) => tasks,
        Err(error) => return error_response(error),
    };

    let mut tasks_with_attempts = Vec::with_capacity(tasks.len());
    for task in tasks {
        let attempts = match state.store.list_attempts(&task.id).await {
            Ok(attempts) => attempts,
            Err(error) => return error_response(error),
        };
        tasks_with_attempts.push(json!({ "task": task, "attempts": attempts }));
    }

    let artifacts = match state.store.list_artifacts(&run_id).await {
        Ok(artifacts) => artifacts,
        Err(error) => return error_response(error),
    };
    let decisions = match state.store.list_merge_decisions(&run_id).await {
        Ok(decisions) => decisions,
        Err(error) => return error_response(error),
    };
    let transitions = match state.store.list_stage_transitions(&run_id).await {
        Ok(transitions) => transitions,
        Err(error) => return error_response(error),
    };

    Json(json!({
        "run": run,
        "tasks": tasks_with_attempts,
        "artifacts": artifacts,
        "merge_decisions": decisions,
        "stage_transitions": transitions
    }))
    .into_response()
}

fn error_response(error: OrchestratorError) -> Response {
    let status = match &error {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

// ============================================================================
// Tests
// ============================================================================
