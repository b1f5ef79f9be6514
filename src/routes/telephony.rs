//! Telephony-facing endpoints: the answer webhook and the media socket.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{media, webhook};
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/answer", post(webhook::answer))
        .route("/ws/media", get(media::media_socket))
}
