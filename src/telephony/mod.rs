//! Telephony leg: inbound call sessions and the outbound REST control plane.

pub mod outbound;
pub mod session;

use thiserror::Error;

pub use outbound::{CallStatus, PlaceCall, TwilioClient};
pub use session::{CallSession, CallState};

/// Errors from the telephony provider boundary.
#[derive(Debug, Error)]
pub enum TelephonyError {
    /// Account SID or auth token not configured.
    #[error("telephony credentials are not configured")]
    MissingCredentials,

    /// No caller id available for an outbound call.
    #[error("no from number configured or provided")]
    MissingFromNumber,

    /// The externally reachable base URL is not configured.
    #[error("PUBLIC_BASE_URL is not configured")]
    MissingPublicUrl,

    /// Non-2xx reply from the provider's REST API, with its status and body.
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    /// Transport-level failure talking to the provider.
    #[error("request to provider failed: {0}")]
    Http(#[from] reqwest::Error),
}
