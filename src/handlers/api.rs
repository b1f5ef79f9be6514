//! Health and readiness endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub timestamp: u64,
    pub active_calls: usize,
}

/// `GET /health`. Always 200 while the process is up.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        timestamp,
        active_calls: state.calls.active_count(),
    })
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<&'static str>,
}

/// `GET /ready`. 503 with the unset required keys until fully configured.
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let missing = state.config.missing_required();
    if missing.is_empty() {
        (StatusCode::OK, Json(ReadyResponse { ready: true, missing })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                missing,
            }),
        )
            .into_response()
    }
}
