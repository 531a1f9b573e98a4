//! Local HTTP API.
//!
//! Read-only core surface plus the two small write endpoints (preferences
//! and operator-logged events). Handlers read the pipeline snapshot and
//! query the store through one lock with a bounded wait; a busy store
//! yields 503, never a stalled acquisition loop.

pub mod handlers;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::persistence::SampleStore;
use crate::pipeline::PipelineSnapshot;
use crate::prefs::Preferences;
use crate::reference::ReferenceData;

/// Shared state for all handlers.
pub struct ApiState {
    pub store: Arc<Mutex<SampleStore>>,
    pub snapshot: Arc<RwLock<PipelineSnapshot>>,
    pub prefs: Arc<RwLock<Preferences>>,
    pub prefs_path: PathBuf,
    pub reference: Arc<ReferenceData>,
    pub db_path: PathBuf,
    pub lock_timeout: Duration,
}

impl ApiState {
    /// Acquire the store lock with the configured bounded wait.
    pub async fn lock_store(&self) -> Result<MutexGuard<'_, SampleStore>, ApiError> {
        tokio::time::timeout(self.lock_timeout, self.store.lock())
            .await
            .map_err(|_| ApiError::Unavailable("store lock timed out".to_string()))
    }
}

/// Compact error body for protocol and storage faults.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (code, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Build the API router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/current", get(handlers::handle_current))
        .route("/api/series", get(handlers::handle_series))
        .route("/api/diagnostics", get(handlers::handle_diagnostics))
        .route(
            "/api/config",
            get(handlers::handle_get_config).post(handlers::handle_post_config),
        )
        .route("/api/log_event", post(handlers::handle_log_event))
        .with_state(state)
}

/// Bind and serve until cancelled.
pub async fn serve(
    state: Arc<ApiState>,
    bind_addr: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP server to {bind_addr}: {e}"))?;
    info!(addr = %bind_addr, "HTTP API listening");

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    info!("HTTP API stopped");
    Ok(())
}
