//! Operational endpoints.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::handlers::api;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health))
        .route("/ready", get(api::ready))
}
