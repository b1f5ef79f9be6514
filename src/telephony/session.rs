//! Per-call session record and its lifecycle state machine.

use std::fmt;
use std::time::SystemTime;

use crate::utils::call_session_id;

/// Lifecycle of one bridged telephone call.
///
/// `Failed` is reachable from any non-terminal state; the normal path is
/// `Ringing -> MediaOpen -> Bridging -> Closing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Webhook received, answer instructions returned.
    Ringing,
    /// Caller-side media socket is live; negotiation in flight.
    MediaOpen,
    /// Both sockets live, frames relaying in both directions.
    Bridging,
    /// Teardown started.
    Closing,
    /// Both sockets closed, resources released.
    Closed,
    /// Irrecoverable failure; caller received an explicit termination.
    Failed,
}

impl CallState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Ringing, MediaOpen) => true,
            (MediaOpen, Bridging) => true,
            (Ringing | MediaOpen | Bridging, Closing) => true,
            (Closing, Closed) => true,
            (Ringing | MediaOpen | Bridging | Closing, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Closed | CallState::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Ringing => "ringing",
            CallState::MediaOpen => "media_open",
            CallState::Bridging => "bridging",
            CallState::Closing => "closing",
            CallState::Closed => "closed",
            CallState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Run-time record of one active telephone call.
///
/// Owned exclusively by the media handler for the call's lifetime; other
/// components see snapshots through the call registry, never the record
/// itself.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Opaque, time-ordered identifier.
    pub session_id: String,
    /// Telephony provider call identifier, known after the `start` event.
    pub call_sid: Option<String>,
    /// Media stream identifier, known after the `start` event.
    pub stream_sid: Option<String>,
    /// Speech provider session identifier, assigned after negotiation.
    pub realtime_session_id: Option<String>,
    pub state: CallState,
    pub started_at: SystemTime,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            session_id: call_session_id(),
            call_sid: None,
            stream_sid: None,
            realtime_session_id: None,
            state: CallState::Ringing,
            started_at: SystemTime::now(),
        }
    }

    /// Apply a state transition, ignoring (and logging) illegal ones.
    ///
    /// Returns whether the transition was applied. Teardown races make a
    /// duplicate `Closing`/`Closed` request normal, so illegal transitions
    /// are not errors.
    pub fn transition(&mut self, next: CallState) -> bool {
        if self.state == next {
            return false;
        }
        if self.state.can_transition(next) {
            tracing::debug!(
                session_id = %self.session_id,
                from = %self.state,
                to = %next,
                "call state transition"
            );
            self.state = next;
            true
        } else {
            tracing::warn!(
                session_id = %self.session_id,
                from = %self.state,
                to = %next,
                "ignoring illegal call state transition"
            );
            false
        }
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}
