//! Axum route handlers for the crewforge HTTP server.
//!
//! # Routes
//!
//! - `GET /health`: liveness probe
//! - `POST /executions`: submit a workflow run
//! - `GET /executions/:id`: status of a run
//! - `DELETE /executions/:id/cache`: drop the cached status
//! - `GET /workflows/:workflow_id/executions`: recent runs of a workflow
//! - `POST /workflows/validate`: parse and validate only

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::execution::{
    ExecutionSummary, ExecutionTracker, StatusReport, Submission, DEFAULT_LIST_LIMIT,
};
use crate::utilities::errors::{ConfigError, SchemaIssue};

/// Shared application state for the HTTP server.
#[derive(Clone, Debug)]
pub struct AppState {
    pub tracker: ExecutionTracker,
}

impl AppState {
    pub fn new(tracker: ExecutionTracker) -> Self {
        Self { tracker }
    }
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/executions", post(submit_handler))
        .route("/executions/:id", get(status_handler))
        .route("/executions/:id/cache", delete(delete_cache_handler))
        .route("/workflows/validate", post(validate_handler))
        .route("/workflows/:workflow_id/executions", get(list_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health: liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "crewforge",
    }))
}

/// POST /executions: returns 202 with the new execution id.
async fn submit_handler(
    State(state): State<AppState>,
    Json(submission): Json<Submission>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if submission.spec.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "'spec' must not be empty"));
    }
    let execution_id = state.tracker.submit(submission).map_err(|e| {
        tracing::error!("Failed to record submission: {}", e);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("could not record execution: {}", e),
        )
    })?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "execution_id": execution_id }))))
}

/// GET /executions/:id: always 200; unknown ids report NOT_FOUND.
async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<StatusReport> {
    Json(state.tracker.get_status(&id))
}

/// DELETE /executions/:id/cache
async fn delete_cache_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.tracker.delete_cache_entry(&id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

/// GET /workflows/:workflow_id/executions?limit=N
async fn list_handler(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ExecutionSummary>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    state
        .tracker
        .list_by_workflow(&workflow_id, limit)
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    spec: String,
    #[serde(default)]
    orchestration_type: Option<String>,
}

/// POST /workflows/validate: 200 when valid, 422 with issues otherwise.
async fn validate_handler(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> (StatusCode, Json<Value>) {
    match state
        .tracker
        .compiler()
        .check(&request.spec, request.orchestration_type.as_deref())
    {
        Ok(spec) => (
            StatusCode::OK,
            Json(json!({
                "valid": true,
                "orchestration_type": spec.orchestration_type,
                "name": spec.name,
            })),
        ),
        Err(e) => {
            let issues: &[SchemaIssue] = match &e {
                ConfigError::Schema(issues) => issues,
                _ => &[],
            };
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "valid": false,
                    "error": e.to_string(),
                    "sections": e.failed_sections(),
                    "issues": issues,
                })),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
