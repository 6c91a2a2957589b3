//! Shared REST plumbing: application state, error mapping and operational
//! endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rewards_core::{ErrorKind, RewardsError, RewardsResult};
use rewards_loyalty::LoyaltyEngine;
use serde::Serialize;
use tracing::{debug, error, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LoyaltyEngine>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<LoyaltyEngine>, node_id: impl Into<String>) -> Self {
        Self {
            engine,
            node_id: node_id.into(),
            start_time: Instant::now(),
        }
    }
}

/// Engine calls may wait on row locks, so they run on the blocking pool.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&LoyaltyEngine) -> RewardsResult<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| ApiError(RewardsError::Internal(anyhow::anyhow!("engine task failed: {}", e))))?
        .map_err(ApiError)
}

/// `RewardsError` rendered as `{error, message}` with a status per kind.
#[derive(Debug)]
pub struct ApiError(pub RewardsError);

impl From<RewardsError> for ApiError {
    fn from(err: RewardsError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Rejected => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.code();
        metrics::counter!("api.errors", "error" => code).increment(1);

        let message = match self.0.kind() {
            ErrorKind::Internal => {
                error!(error = %self.0, "Request failed");
                "Internal processing error".to_string()
            }
            ErrorKind::Transient => {
                warn!(error = %self.0, "Request hit contention");
                self.0.to_string()
            }
            _ => {
                debug!(error = %self.0, "Request rejected");
                self.0.to_string()
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

/// GET /health: Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        loyalty_enabled: state.engine.is_enabled(),
        config_version: state.engine.settings().current().version,
    })
}

/// GET /ready: Readiness check. The engine is built before the router, so
/// a running server is ready unless loyalty is switched off.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.engine.is_enabled() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: Liveness check.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub loyalty_enabled: bool,
    pub config_version: u64,
}
