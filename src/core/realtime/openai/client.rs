//! OpenAI Realtime session client: two-phase setup plus the session task.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use base64::prelude::*;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::core::realtime::base::{
    RealtimeError, RealtimeResult, RealtimeSessionConfig, SessionCommand, SessionEvent,
    SessionHandle,
};
use crate::utils::Backoff;

use super::config::{BETA_HEADER, REALTIME_PATH, SESSIONS_PATH};
use super::messages::{
    ClientEvent, ConversationItem, NegotiationRequest, NegotiationResponse, ServerEvent,
    SessionUpdateConfig, ToolDef,
};

/// Capacity of the command and event channels.
const CHANNEL_CAPACITY: usize = 256;

/// Open a realtime session for the given configuration.
///
/// Phase one mints an ephemeral client secret over REST; phase two opens the
/// session socket authenticated with that secret. Both phases share the
/// config's connect timeout. On success the caller receives a command handle
/// and the session's event stream.
pub async fn connect(
    config: &RealtimeSessionConfig,
) -> RealtimeResult<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
    if config.api_key.is_empty() {
        return Err(RealtimeError::MissingCredentials(
            "realtime provider API key is not configured".to_string(),
        ));
    }

    let timeout_secs = config.connect_timeout.as_secs();
    tokio::time::timeout(config.connect_timeout, setup(config))
        .await
        .map_err(|_| RealtimeError::ConnectTimeout(timeout_secs))?
}

async fn setup(
    config: &RealtimeSessionConfig,
) -> RealtimeResult<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
    // Phase one: ephemeral credential scoped to this session config.
    let secret = negotiate(config).await?;

    // Phase two: the session socket, authenticated with the ephemeral secret.
    let ws_url = format!("{}{}?model={}", config.ws_base, REALTIME_PATH, config.model);
    let parsed = Url::parse(&ws_url)
        .map_err(|e| RealtimeError::ConnectionFailed(format!("invalid session URL: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| RealtimeError::ConnectionFailed("session URL has no host".to_string()))?
        .to_string();

    let request = http::Request::builder()
        .uri(&ws_url)
        .header("Authorization", format!("Bearer {}", secret))
        .header(BETA_HEADER.0, BETA_HEADER.1)
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host)
        .body(())
        .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

    info!(model = %config.model, "realtime session socket connected");

    let (mut ws_sink, ws_stream) = ws_stream.split();

    // Advertise tools and instructions before any audio flows.
    let update = ClientEvent::SessionUpdate {
        session: session_update_from(config),
    };
    let json = serde_json::to_string(&update)
        .map_err(|e| RealtimeError::Serialization(e.to_string()))?;
    ws_sink
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;

    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let session_id = Arc::new(RwLock::new(None));

    let handle = SessionHandle::new(command_tx, cancel.clone(), session_id.clone());

    tokio::spawn(run_session(
        ws_sink,
        ws_stream,
        command_rx,
        event_tx,
        cancel,
        session_id,
    ));

    Ok((handle, event_rx))
}

/// Open a session, retrying transient failures with bounded exponential
/// backoff. Missing credentials fail immediately; after `max_retries`
/// consecutive failures the last error is returned.
pub async fn connect_with_retry(
    config: &RealtimeSessionConfig,
    max_retries: u32,
) -> RealtimeResult<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
    let mut backoff = Backoff::default();
    let mut failures: u32 = 0;
    loop {
        match connect(config).await {
            Ok(session) => return Ok(session),
            Err(err @ RealtimeError::MissingCredentials(_)) => return Err(err),
            Err(err) => {
                failures += 1;
                if failures >= max_retries.max(1) {
                    warn!(failures, "realtime session setup exhausted retries: {err}");
                    return Err(err);
                }
                let delay = backoff.next_delay();
                warn!(
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "realtime session setup failed, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Phase one: request an ephemeral client secret.
async fn negotiate(config: &RealtimeSessionConfig) -> RealtimeResult<String> {
    let url = format!("{}{}", config.api_base, SESSIONS_PATH);
    let response = reqwest::Client::new()
        .post(&url)
        .bearer_auth(&config.api_key)
        .header(BETA_HEADER.0, BETA_HEADER.1)
        .json(&NegotiationRequest::from(config))
        .send()
        .await
        .map_err(|e| RealtimeError::Negotiation(e.to_string()))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(RealtimeError::Negotiation(format!("{status}: {body}")));
    }

    let negotiated: NegotiationResponse = serde_json::from_str(&body)
        .map_err(|e| RealtimeError::Negotiation(format!("unparseable reply: {e}")))?;
    debug!(session = ?negotiated.id, "ephemeral credential negotiated");
    Ok(negotiated.client_secret.value)
}

fn session_update_from(config: &RealtimeSessionConfig) -> SessionUpdateConfig {
    SessionUpdateConfig {
        modalities: Some(config.modalities.clone()),
        voice: Some(config.voice.clone()),
        instructions: config.instructions.clone(),
        temperature: config.temperature,
        max_response_output_tokens: config.max_output_tokens,
        tools: config
            .tools
            .iter()
            .map(|t| ToolDef {
                tool_type: "function".to_string(),
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect(),
        tool_choice: if config.tools.is_empty() {
            None
        } else {
            Some("auto".to_string())
        },
    }
}

/// The session task: translates commands to wire events and wire events to
/// [`SessionEvent`]s until either side closes or the handle cancels.
async fn run_session<Sink, Stream>(
    mut ws_sink: Sink,
    mut ws_stream: Stream,
    mut command_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    session_id: Arc<RwLock<Option<String>>>,
) where
    Sink: SinkExt<Message> + Unpin,
    Sink::Error: std::fmt::Display,
    Stream: StreamExt<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    // call_id -> function name, populated by OutputItemAdded and consumed by
    // FunctionCallArgumentsDone, which does not carry the name itself.
    let mut pending_tool_calls: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("realtime session closed by handle");
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }

            command = command_rx.recv() => {
                let Some(command) = command else {
                    // Every handle dropped; tear the socket down.
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                };
                let events = match command {
                    SessionCommand::Audio(audio) => vec![ClientEvent::InputAudioBufferAppend {
                        audio: BASE64_STANDARD.encode(&audio),
                    }],
                    SessionCommand::ToolResult { call_id, output } => vec![
                        ClientEvent::ConversationItemCreate {
                            item: ConversationItem::function_call_output(&call_id, &output),
                        },
                        ClientEvent::ResponseCreate {},
                    ],
                };
                let mut failed = false;
                for event in events {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!("failed to serialize client event: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        let _ = event_tx
                            .send(SessionEvent::Error(RealtimeError::WebSocketError(
                                e.to_string(),
                            )))
                            .await;
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }

            message = ws_stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let event = match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!("unparseable server event: {e}");
                                continue;
                            }
                        };
                        handle_server_event(
                            event,
                            &event_tx,
                            &session_id,
                            &mut pending_tool_calls,
                        )
                        .await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            warn!("failed to send pong: {e}");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("realtime session socket closed by provider");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = event_tx
                            .send(SessionEvent::Error(RealtimeError::WebSocketError(
                                e.to_string(),
                            )))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    let _ = event_tx.send(SessionEvent::Closed).await;
}

async fn handle_server_event(
    event: ServerEvent,
    event_tx: &mpsc::Sender<SessionEvent>,
    session_id: &Arc<RwLock<Option<String>>>,
    pending_tool_calls: &mut HashMap<String, String>,
) {
    match event {
        ServerEvent::SessionCreated { session } => {
            info!(session_id = %session.id, "realtime session created");
            if let Ok(mut guard) = session_id.write() {
                *guard = Some(session.id.clone());
            }
            let _ = event_tx
                .send(SessionEvent::Created {
                    session_id: session.id,
                })
                .await;
        }

        ServerEvent::SessionUpdated { session } => {
            debug!(session_id = %session.id, "realtime session updated");
        }

        ServerEvent::AudioDelta { delta, .. } => match BASE64_STANDARD.decode(&delta) {
            Ok(audio) => {
                // Agent audio is droppable; never block the socket loop
                // behind a slow consumer.
                if let Err(mpsc::error::TrySendError::Full(_)) =
                    event_tx.try_send(SessionEvent::Audio(Bytes::from(audio)))
                {
                    trace!("event queue full, dropping agent audio frame");
                }
            }
            Err(e) => warn!("failed to decode audio delta: {e}"),
        },

        ServerEvent::SpeechStarted => {
            debug!("caller speech detected, signalling interruption");
            let _ = event_tx.send(SessionEvent::Interrupted).await;
        }

        ServerEvent::OutputItemAdded { item } => {
            if item.item_type == "function_call" {
                if let (Some(call_id), Some(name)) = (item.call_id, item.name) {
                    debug!(%call_id, %name, "tracking pending tool call");
                    pending_tool_calls.insert(call_id, name);
                }
            }
        }

        ServerEvent::FunctionCallArgumentsDone {
            call_id, arguments, ..
        } => {
            let name = match pending_tool_calls.remove(&call_id) {
                Some(name) => name,
                None => {
                    warn!(%call_id, "tool call arguments for unknown call id");
                    String::new()
                }
            };
            let _ = event_tx
                .send(SessionEvent::ToolCall {
                    call_id,
                    name,
                    arguments,
                })
                .await;
        }

        ServerEvent::ResponseDone { response } => {
            debug!(response_id = %response.id, "response complete");
        }

        ServerEvent::Error { error } => {
            warn!(error_type = %error.error_type, "provider error: {}", error.message);
            let _ = event_tx
                .send(SessionEvent::Error(RealtimeError::Provider(format!(
                    "{}: {}",
                    error.error_type, error.message
                ))))
                .await;
        }

        ServerEvent::Unknown => {
            trace!("ignoring unhandled server event");
        }
    }
}
