//! Control surface routes.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;
use tunekit_pipeline::{JobSupervisor, PipelineError, PipelineState, StartAccepted};

#[derive(Debug, Clone)]
pub struct AppState {
    pub supervisor: JobSupervisor,
}

impl AppState {
    #[must_use]
    pub fn new(supervisor: JobSupervisor) -> Self {
        Self { supervisor }
    }
}

/// Builds the router. The `/api/train/*` and `/api/health` paths are
/// aliases kept for existing pollers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/api/train/start", post(start))
        .route("/api/train/status", get(status))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            PipelineError::AdmissionConflict { phase } => {
                let message = format!("Training is already running (phase: {phase})");
                (StatusCode::CONFLICT, Json(json!({ "error": message, "phase": phase }))).into_response()
            }
            other => {
                error!(error = %other, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": other.to_string() }))).into_response()
            }
        }
    }
}

async fn start(State(state): State<AppState>) -> Result<(StatusCode, Json<StartAccepted>), ApiError> {
    let accepted = state.supervisor.start()?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn status(State(state): State<AppState>) -> Json<PipelineState> {
    Json(state.supervisor.status())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
