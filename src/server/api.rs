use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::error;

use crate::errors::PipelineError;
use crate::pipeline::{DEFAULT_STATUS_LIMIT, Orchestrator, StartOutcome};

/// Largest `limit` a status query accepts.
pub const MAX_STATUS_LIMIT: usize = 1000;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

impl LimitQuery {
    fn resolve(&self) -> Result<usize, ApiError> {
        let Some(raw) = self.limit.as_deref() else {
            return Ok(DEFAULT_STATUS_LIMIT);
        };
        match raw.trim().parse::<usize>() {
            Ok(n) if (1..=MAX_STATUS_LIMIT).contains(&n) => Ok(n),
            _ => Err(ApiError::BadRequest(format!(
                "limit must be an integer between 1 and {MAX_STATUS_LIMIT}, got '{raw}'"
            ))),
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        error!(error = %err, "Request failed");
        ApiError::Internal(err.to_string())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/runs", post(start_run))
        .route("/api/experiments", get(list_experiments))
        .route("/api/experiments/completed", get(list_completed))
        .route("/api/experiments/current", get(current_experiment))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn start_run(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.orchestrator.clone();
    // start() appends to the experiment log under its lock
    let outcome = tokio::task::spawn_blocking(move || orchestrator.start())
        .await
        .map_err(|e| ApiError::Internal(format!("Start task failed: {e}")))??;

    Ok(match outcome {
        StartOutcome::Started { experiment_id, .. } => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "started", "experiment_id": experiment_id})),
        ),
        StartOutcome::AlreadyRunning { experiment_id } => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"status": "already_running", "experiment_id": experiment_id})),
        ),
    })
}

async fn list_experiments(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.resolve()?;
    let experiments = state.orchestrator.status(limit).await?;
    Ok(Json(experiments))
}

async fn list_completed(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.resolve()?;
    let experiments = state.orchestrator.completed_history(limit).await?;
    Ok(Json(experiments))
}

async fn current_experiment(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.current()?))
}

// ── Tests ─────────────────────────────────────────────────────────────
