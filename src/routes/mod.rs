//! Route table assembly.

pub mod api;
pub mod telephony;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Full application router, ready for middleware layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::routes())
        .merge(telephony::routes())
        .with_state(state)
}
