//! Verification Routes

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use face_verify::{Identity, OrchestratorError, PipelineStats, VerificationSnapshot};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::warn;

use crate::AppState;

/// Response for the verification endpoints
#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    #[serde(flatten)]
    pub snapshot: VerificationSnapshot,
    pub verifying: bool,
    pub capturing: bool,
    pub target: Identity,
    pub stats: PipelineStats,
}

impl VerificationResponse {
    fn from_state(state: &AppState) -> Self {
        let orchestrator = &state.orchestrator;
        Self {
            snapshot: orchestrator.snapshot(),
            verifying: orchestrator.is_verifying(),
            capturing: orchestrator.is_capturing(),
            target: orchestrator.target().clone(),
            stats: orchestrator.stats(),
        }
    }
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler failures mapped to HTTP responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Lifecycle task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Orchestrator(OrchestratorError::Capture(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Orchestrator(_) | ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("Request failed: {}", self);
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Get current verification state
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<VerificationResponse> {
    Json(VerificationResponse::from_state(&state))
}

/// Begin a verification attempt.
///
/// Starting capture may reap a finished camera thread, so it runs on the
/// blocking pool.
pub async fn start(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let lifecycle = state.clone();
    tokio::task::spawn_blocking(move || lifecycle.orchestrator.start()).await??;
    Ok(Json(VerificationResponse::from_state(&state)))
}

/// Abandon the current attempt and stop capture.
///
/// Stopping joins the camera thread, so it runs on the blocking pool.
pub async fn stop(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VerificationResponse>, ApiError> {
    let lifecycle = state.clone();
    tokio::task::spawn_blocking(move || lifecycle.orchestrator.stop()).await?;
    Ok(Json(VerificationResponse::from_state(&state)))
}
