//! HTTP route handlers for the workflow API.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use mender::core::types::{WorkflowConfig, new_workflow_id};
use mender::{ErrorKind, WorkflowController};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::state::AppState;

type ApiResponse = (StatusCode, Json<Value>);

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/samples", get(list_samples))
        .route("/workflows", post(create_workflow).get(list_workflows))
        .route("/workflows/{workflow_id}", get(get_workflow))
        .route("/workflows/{workflow_id}/cancel", post(cancel_workflow))
}

/// GET /api/health - liveness plus run counts.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "workflows": state.registry.count(),
        "running": state.in_flight(),
    }))
}

/// GET /api/samples - example inputs grouped by kind, ready to post as
/// `inputs` of a workflow config.
async fn list_samples() -> Json<Value> {
    Json(json!({
        "research_papers": [
            {"type": "pdf", "name": "attention_is_all_you_need.pdf"},
            {"type": "pdf", "name": "gpt4_technical_report.pdf"},
        ],
        "code_repositories": [
            {"type": "repo", "name": "ml_pipeline"},
            {"type": "repo", "name": "api_server"},
        ],
        "web_links": [
            {"type": "url", "name": "https://arxiv.org/abs/2303.08774"},
            {"type": "url", "name": "https://paperswithcode.com/sota"},
        ],
        "youtube_videos": [
            {"type": "youtube", "name": "https://youtube.com/watch?v=kCc8FmEb1nY"},
        ],
    }))
}

/// POST /api/workflows - run a workflow to completion and return the run.
async fn create_workflow(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResponse {
    let config: WorkflowConfig = match serde_json::from_value(body) {
        Ok(config) => config,
        Err(err) => return invalid_config(err.to_string()),
    };
    if config.name.trim().is_empty() {
        return invalid_config("name must not be empty".to_string());
    }

    let controller = match WorkflowController::from_settings((*state.settings).clone()) {
        Ok(controller) => controller,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "controller setup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"), None);
        }
    };

    let workflow_id = new_workflow_id();
    let in_flight = state.register_run(&workflow_id);
    let controller = controller
        .with_cancellation(in_flight.token())
        .with_observer(Arc::new(state.observer()));
    info!(%workflow_id, name = %config.name, "workflow accepted");

    // The blocking task outlives this handler if the client goes away, so it
    // owns the in-flight guard.
    let joined = tokio::task::spawn_blocking(move || {
        let result = controller.run_with_id(workflow_id, &config);
        drop(in_flight);
        result
    })
    .await;

    match joined {
        Ok(Ok(run)) => (StatusCode::CREATED, Json(json!(run))),
        Ok(Err(err)) => {
            let status = match &err.kind {
                ErrorKind::InvalidConfig => StatusCode::BAD_REQUEST,
                ErrorKind::Cancelled => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let run = err.run.as_deref().map(|run| json!(run));
            error_response(status, err.to_string(), run)
        }
        Err(join_err) => {
            warn!(error = %join_err, "workflow task panicked");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                join_err.to_string(),
                None,
            )
        }
    }
}

/// GET /api/workflows - all known runs.
async fn list_workflows(State(state): State<AppState>) -> ApiResponse {
    let workflows = state.registry.list();
    let count = workflows.len();
    (
        StatusCode::OK,
        Json(json!({"workflows": workflows, "count": count})),
    )
}

/// GET /api/workflows/{id} - one run snapshot.
async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResponse {
    match state.registry.get(&workflow_id) {
        Some(run) => (StatusCode::OK, Json(json!(run))),
        None => error_response(StatusCode::NOT_FOUND, "Workflow not found".to_string(), None),
    }
}

/// POST /api/workflows/{id}/cancel - request cancellation of an in-flight run.
async fn cancel_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> ApiResponse {
    if state.cancel_run(&workflow_id) {
        info!(%workflow_id, "cancellation requested");
        return (
            StatusCode::ACCEPTED,
            Json(json!({"workflow_id": workflow_id, "cancelled": true})),
        );
    }
    if state.registry.get(&workflow_id).is_some() {
        return error_response(
            StatusCode::CONFLICT,
            "Workflow is not running".to_string(),
            None,
        );
    }
    error_response(StatusCode::NOT_FOUND, "Workflow not found".to_string(), None)
}

fn invalid_config(detail: String) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "Invalid configuration", "detail": detail})),
    )
}

fn error_response(status: StatusCode, error: String, workflow: Option<Value>) -> ApiResponse {
    let mut body = json!({"error": error});
    if let Some(workflow) = workflow {
        body["workflow"] = workflow;
    }
    (status, Json(body))
}
