//! Telephony answer webhook.
//!
//! The provider POSTs here when an inbound call arrives. The response is
//! returned immediately. Realtime session negotiation happens later, on the
//! media socket, so a slow provider never delays call pickup.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

/// TwiML instructing the provider to open a duplex media stream to us.
fn answer_twiml(stream_url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Connect>
        <Stream url="{stream_url}" />
    </Connect>
</Response>"#
    )
}

/// `POST /answer`.
///
/// Returns TwiML pointing at the media socket, 503 while voice is disabled or
/// the process is draining, or 500 when no public base URL is configured.
pub async fn answer(State(state): State<Arc<crate::state::AppState>>) -> AppResult<Response> {
    if !state.accepting_calls() {
        let reason = if state.is_draining() {
            "draining"
        } else {
            "voice disabled"
        };
        warn!(reason, "refusing inbound call");
        return Err(AppError::ServiceUnavailable(
            "voice service unavailable".to_string(),
        ));
    }

    // Voice enabled but no reachable base URL is a deployment mistake, not a
    // capacity condition.
    let Some(stream_url) = state.config.media_socket_url() else {
        warn!("refusing inbound call: PUBLIC_BASE_URL is not configured");
        return Err(AppError::Internal(
            "voice service misconfigured".to_string(),
        ));
    };

    info!(%stream_url, "answering inbound call");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        answer_twiml(&stream_url),
    )
        .into_response())
}
