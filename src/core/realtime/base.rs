//! Base types for realtime speech-to-speech sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::core::realtime::openai::config::normalize_voice;
use crate::tools::ToolSpec;

/// Errors that can occur while setting up or driving a realtime session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Required provider credential is absent. Fatal, never retried.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The ephemeral-credential negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Negotiation plus socket connect exceeded the bounded timeout.
    #[error("session setup timed out after {0}s")]
    ConnectTimeout(u64),

    /// The session socket could not be opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error after the session was established.
    #[error("websocket error: {0}")]
    WebSocketError(String),

    /// Provider-reported error event.
    #[error("provider error: {0}")]
    Provider(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The outbound audio queue is full; the frame was dropped.
    #[error("audio queue full")]
    Backpressure,

    /// The session is closed or was never opened.
    #[error("not connected")]
    NotConnected,
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Tool advertised to the speech provider for function calling.
#[derive(Debug, Clone)]
pub struct SessionToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl From<&ToolSpec> for SessionToolDefinition {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.parameters.clone(),
        }
    }
}

/// Immutable configuration snapshot for one realtime session.
///
/// Captured once per call session at creation time and never mutated mid-call.
#[derive(Debug, Clone)]
pub struct RealtimeSessionConfig {
    pub api_key: String,
    /// REST base for negotiation, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    /// WebSocket base for the session socket, e.g. `wss://api.openai.com/v1`.
    pub ws_base: String,
    pub model: String,
    pub voice: String,
    pub modalities: Vec<String>,
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<i32>,
    pub tools: Vec<SessionToolDefinition>,
    /// Bound on negotiation plus socket connect.
    pub connect_timeout: Duration,
}

impl RealtimeSessionConfig {
    /// Snapshot the provider settings from server configuration.
    ///
    /// The API key may be absent here; `connect` surfaces that as a fatal
    /// `MissingCredentials` before any network call.
    pub fn from_server_config(config: &ServerConfig, tools: Vec<SessionToolDefinition>) -> Self {
        Self {
            api_key: config.openai_api_key.clone().unwrap_or_default(),
            api_base: config.realtime_api_base.clone(),
            ws_base: config.realtime_ws_base.clone(),
            model: config.realtime_model.clone(),
            voice: normalize_voice(&config.realtime_voice).to_string(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: config.realtime_instructions.clone(),
            temperature: config.realtime_temperature,
            max_output_tokens: config.realtime_max_output_tokens,
            tools,
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Events produced by a live session, consumed by the bridging task.
#[derive(Debug)]
pub enum SessionEvent {
    /// Provider assigned a session id during setup.
    Created { session_id: String },
    /// One frame of agent audio (provider-leg encoding).
    Audio(Bytes),
    /// The agent invoked a named tool; reply via
    /// [`SessionHandle::submit_tool_result`] with the same `call_id`.
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// The caller began speaking; queued agent audio is now stale.
    Interrupted,
    /// Non-fatal provider or transport error.
    Error(RealtimeError),
    /// The session ended; no further events will arrive.
    Closed,
}

/// Commands the handle feeds into the session task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Audio(Bytes),
    ToolResult { call_id: String, output: String },
}

/// Cheap-to-clone handle to a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    session_id: Arc<RwLock<Option<String>>>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SessionCommand>,
        cancel: CancellationToken,
        session_id: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            commands,
            cancel,
            closed: Arc::new(AtomicBool::new(false)),
            session_id,
        }
    }

    /// Provider session id, once assigned.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().map(|g| g.clone()).unwrap_or(None)
    }

    /// Send one outbound audio frame to the agent.
    ///
    /// Audio is droppable under load: when the session task is backed up the
    /// frame is rejected with `Backpressure` instead of blocking the bridge
    /// behind a stalled socket.
    pub fn send_audio(&self, audio: Bytes) -> RealtimeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::NotConnected);
        }
        self.commands
            .try_send(SessionCommand::Audio(audio))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RealtimeError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => RealtimeError::NotConnected,
            })
    }

    /// Submit the correlated result of a tool invocation.
    pub async fn submit_tool_result(&self, call_id: &str, output: &str) -> RealtimeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::NotConnected);
        }
        self.commands
            .send(SessionCommand::ToolResult {
                call_id: call_id.to_string(),
                output: output.to_string(),
            })
            .await
            .map_err(|_| RealtimeError::NotConnected)
    }

    /// Close the session. Idempotent: a second close is a no-op.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_handle() -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(4);
        let handle = SessionHandle::new(
            tx,
            CancellationToken::new(),
            Arc::new(RwLock::new(Some("rs_test".to_string()))),
        );
        (handle, rx)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (handle, _rx) = detached_handle();
        handle.close();
        handle.close();
        handle.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn send_after_close_is_rejected() {
        let (handle, _rx) = detached_handle();
        handle.close();
        let err = handle.send_audio(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, RealtimeError::NotConnected));
    }

    #[test]
    fn full_audio_queue_drops_instead_of_blocking() {
        let (handle, _rx) = detached_handle();
        for _ in 0..4 {
            handle.send_audio(Bytes::from_static(b"x")).unwrap();
        }
        let err = handle.send_audio(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, RealtimeError::Backpressure));
    }

    #[tokio::test]
    async fn clones_share_close_state() {
        let (handle, _rx) = detached_handle();
        let other = handle.clone();
        handle.close();
        assert!(other.is_closed());
    }

    #[test]
    fn handle_exposes_session_id() {
        let (handle, _rx) = detached_handle();
        assert_eq!(handle.session_id().as_deref(), Some("rs_test"));
    }
}
