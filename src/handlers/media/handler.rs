//! The media bridge: one task per call, owning both legs.
//!
//! Lifecycle: the socket opens in `Ringing`, the provider's `start` frame
//! moves it to `MediaOpen` and kicks off realtime negotiation concurrently,
//! and a successful negotiation wires the transcode pipeline in both
//! directions (`Bridging`). Either leg closing tears the call down exactly
//! once. An exhausted negotiation fails the call with an explicit mark and a
//! close frame so the caller is never left on a silent line.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::audio::{
    FrameEncoding, FrameSequence, MediaFrame, PassthroughTranscoder, Transcoder,
    REALTIME_SAMPLE_RATE_HZ, TELEPHONY_SAMPLE_RATE_HZ,
};
use crate::core::realtime::{
    connect_with_retry, RealtimeError, RealtimeResult, RealtimeSessionConfig, SessionEvent,
    SessionHandle, SessionToolDefinition,
};
use crate::state::{AppState, CallSnapshot};
use crate::telephony::{CallSession, CallState};
use crate::tools::RpcClient;

use super::messages::{InboundFrame, OutboundFrame};

/// Mark name sent to the caller when bridging fails.
const BRIDGE_FAILED_MARK: &str = "bridge-failed";

/// Depth of the outbound frame queue toward the telephony provider.
const OUTBOUND_QUEUE: usize = 256;

/// How long an outbound enqueue may block before the peer is considered
/// stalled. A full queue for this long means the caller-side TCP peer has
/// stopped reading; the call is torn down rather than wedged.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

type NegotiationOutcome = RealtimeResult<(SessionHandle, mpsc::Receiver<SessionEvent>)>;

/// `GET /ws/media` upgrade entry point.
pub async fn media_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state))
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut call = CallSession::new();
    info!(session_id = %call.session_id, "media socket opened");

    state.calls.insert(
        &call.session_id,
        CallSnapshot {
            call_sid: None,
            state: call.state,
            started_at: call.started_at,
        },
    );

    let (ws_sink, mut ws_stream) = socket.split();

    // All outbound telephony frames funnel through one writer task so the
    // bridge loop and tool tasks never contend for the sink.
    let (out_tx, out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let mut writer = tokio::spawn(write_frames(ws_sink, out_rx));

    let transcoder: Arc<dyn Transcoder> = Arc::new(PassthroughTranscoder);
    let inbound_seq = FrameSequence::new();
    let outbound_seq = FrameSequence::new();

    let mut negotiation: Option<oneshot::Receiver<NegotiationOutcome>> = None;
    let mut session: Option<SessionHandle> = None;
    let mut session_events: Option<mpsc::Receiver<SessionEvent>> = None;

    let rpc_client = state
        .config
        .is_tools_rpc_enabled()
        .then(|| RpcClient::new(format!("127.0.0.1:{}", state.config.tools_rpc_port)));

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!(session_id = %call.session_id, "media socket error: {e}");
                        break;
                    }
                    None => {
                        debug!(session_id = %call.session_id, "media socket closed by provider");
                        break;
                    }
                };
                match message {
                    Message::Text(text) => {
                        let frame = match serde_json::from_str::<InboundFrame>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(session_id = %call.session_id, "unparseable media frame: {e}");
                                continue;
                            }
                        };
                        let keep_going = on_inbound_frame(
                            frame,
                            &mut call,
                            &state,
                            &mut negotiation,
                            session.as_ref(),
                            transcoder.as_ref(),
                            &inbound_seq,
                        )
                        .await;
                        if !keep_going {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        debug!(session_id = %call.session_id, "close frame from provider");
                        break;
                    }
                    _ => {}
                }
            }

            outcome = negotiation_done(&mut negotiation) => {
                match outcome {
                    Ok((handle, events)) => {
                        info!(session_id = %call.session_id, "realtime session bridged");
                        call.transition(CallState::Bridging);
                        state.calls.update(&call.session_id, None, call.state);
                        session = Some(handle);
                        session_events = Some(events);
                    }
                    Err(e) => {
                        warn!(session_id = %call.session_id, "bridging failed: {e}");
                        call.transition(CallState::Failed);
                        state.calls.update(&call.session_id, None, call.state);
                        // Explicit termination, never a silent drop. Teardown
                        // below sends the close frame.
                        if let Some(stream_sid) = call.stream_sid.as_deref() {
                            send_frame(&out_tx, OutboundFrame::mark(stream_sid, BRIDGE_FAILED_MARK)).await;
                        }
                        break;
                    }
                }
            }

            event = session_event(&mut session_events) => {
                let Some(event) = event else {
                    debug!(session_id = %call.session_id, "realtime event stream ended");
                    break;
                };
                let keep_going = on_session_event(
                    event,
                    &mut call,
                    session.as_ref(),
                    rpc_client.as_ref(),
                    &out_tx,
                    transcoder.as_ref(),
                    &outbound_seq,
                )
                .await;
                if !keep_going {
                    break;
                }
            }
        }
    }

    // Teardown is idempotent on both legs.
    finish_call(&mut call);
    if let Some(handle) = session.as_ref() {
        handle.close();
    }
    // try_send: the queue may be full behind a stalled peer, and the writer
    // closes the sink on its way out regardless.
    let _ = out_tx.try_send(Message::Close(None));
    drop(out_tx);
    if tokio::time::timeout(SEND_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    state.calls.remove(&call.session_id);
    info!(
        session_id = %call.session_id,
        call_sid = call.call_sid.as_deref().unwrap_or("-"),
        state = %call.state,
        "call torn down"
    );
}

/// Drive a finished call to `Closed`. Calls that already failed keep their
/// terminal state.
fn finish_call(call: &mut CallSession) {
    if !call.state.is_terminal() && call.transition(CallState::Closing) {
        call.transition(CallState::Closed);
    }
}

/// Writer task: drains the outbound queue into the telephony socket.
async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() {
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Queue one frame toward the telephony socket. Returns false when the writer
/// is gone or the peer has stalled past `SEND_TIMEOUT`, meaning the call
/// should end.
async fn send_frame(out_tx: &mpsc::Sender<Message>, frame: OutboundFrame) -> bool {
    let json = match serde_json::to_string(&frame) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to serialize outbound frame: {e}");
            return true;
        }
    };
    match tokio::time::timeout(SEND_TIMEOUT, out_tx.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            trace!("outbound queue closed, dropping frame");
            false
        }
        Err(_) => {
            warn!("outbound queue full, telephony peer stalled");
            false
        }
    }
}

/// Awaits the pending negotiation, or parks forever when none is in flight.
async fn negotiation_done(
    slot: &mut Option<oneshot::Receiver<NegotiationOutcome>>,
) -> NegotiationOutcome {
    match slot {
        Some(rx) => {
            let outcome = rx.await;
            *slot = None;
            match outcome {
                Ok(outcome) => outcome,
                // Negotiation task dropped its sender without reporting.
                Err(_) => Err(RealtimeError::ConnectionFailed(
                    "negotiation task aborted".to_string(),
                )),
            }
        }
        None => std::future::pending().await,
    }
}

/// Awaits the next session event, or parks forever before the bridge is up.
async fn session_event(
    slot: &mut Option<mpsc::Receiver<SessionEvent>>,
) -> Option<SessionEvent> {
    match slot {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// React to one telephony frame. Returns false when the call should end.
async fn on_inbound_frame(
    frame: InboundFrame,
    call: &mut CallSession,
    state: &Arc<AppState>,
    negotiation: &mut Option<oneshot::Receiver<NegotiationOutcome>>,
    session: Option<&SessionHandle>,
    transcoder: &dyn Transcoder,
    inbound_seq: &FrameSequence,
) -> bool {
    match frame {
        InboundFrame::Connected { protocol } => {
            debug!(
                session_id = %call.session_id,
                protocol = protocol.as_deref().unwrap_or("-"),
                "media stream connected"
            );
            true
        }

        InboundFrame::Start { start } => {
            info!(
                session_id = %call.session_id,
                call_sid = %start.call_sid,
                stream_sid = %start.stream_sid,
                "media stream started"
            );
            call.call_sid = Some(start.call_sid.clone());
            call.stream_sid = Some(start.stream_sid);
            call.transition(CallState::MediaOpen);
            state
                .calls
                .update(&call.session_id, Some(start.call_sid), call.state);

            if negotiation.is_none() && session.is_none() {
                *negotiation = Some(spawn_negotiation(state));
            }
            true
        }

        InboundFrame::Media { media } => {
            let Some(handle) = session else {
                // Caller audio before the bridge is up is dropped.
                trace!(session_id = %call.session_id, "dropping pre-bridge audio frame");
                return true;
            };
            let payload = match BASE64_STANDARD.decode(&media.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(session_id = %call.session_id, "undecodable media payload: {e}");
                    return true;
                }
            };
            let frame = MediaFrame::new(
                Bytes::from(payload),
                FrameEncoding::Legacy,
                inbound_seq.next(),
            );
            let pcm = transcoder.decode(&frame.payload);
            let pcm = transcoder.resample(&pcm, TELEPHONY_SAMPLE_RATE_HZ, REALTIME_SAMPLE_RATE_HZ);
            let frame = frame.transformed(Bytes::from(pcm), FrameEncoding::Target);
            match handle.send_audio(frame.payload) {
                Ok(()) => {}
                Err(RealtimeError::Backpressure) => {
                    trace!(
                        session_id = %call.session_id,
                        seq = frame.seq,
                        "dropping caller audio under backpressure"
                    );
                }
                Err(e) => {
                    warn!(session_id = %call.session_id, seq = frame.seq, "dropping caller audio: {e}");
                }
            }
            true
        }

        InboundFrame::Stop { .. } => {
            info!(session_id = %call.session_id, "media stream stopped by provider");
            false
        }

        InboundFrame::Mark { mark } => {
            debug!(session_id = %call.session_id, mark = %mark.name, "mark acknowledged");
            true
        }

        InboundFrame::Unknown => {
            trace!(session_id = %call.session_id, "ignoring unhandled media event");
            true
        }
    }
}

/// Kick off realtime negotiation without blocking the media socket.
fn spawn_negotiation(state: &Arc<AppState>) -> oneshot::Receiver<NegotiationOutcome> {
    let (tx, rx) = oneshot::channel();
    let tools: Vec<SessionToolDefinition> = state
        .tools
        .specs()
        .iter()
        .map(SessionToolDefinition::from)
        .collect();
    let config = RealtimeSessionConfig::from_server_config(&state.config, tools);
    let max_retries = state.config.negotiation_max_retries;
    tokio::spawn(async move {
        let outcome = connect_with_retry(&config, max_retries).await;
        let _ = tx.send(outcome);
    });
    rx
}

/// React to one realtime session event. Returns false when the call should end.
#[allow(clippy::too_many_arguments)]
async fn on_session_event(
    event: SessionEvent,
    call: &mut CallSession,
    session: Option<&SessionHandle>,
    rpc_client: Option<&RpcClient>,
    out_tx: &mpsc::Sender<Message>,
    transcoder: &dyn Transcoder,
    outbound_seq: &FrameSequence,
) -> bool {
    match event {
        SessionEvent::Created { session_id } => {
            info!(
                session_id = %call.session_id,
                realtime_session_id = %session_id,
                "realtime session created"
            );
            call.realtime_session_id = Some(session_id);
            true
        }

        SessionEvent::Audio(audio) => {
            let Some(stream_sid) = call.stream_sid.as_deref() else {
                trace!(session_id = %call.session_id, "dropping agent audio before start frame");
                return true;
            };
            let frame = MediaFrame::new(audio, FrameEncoding::Target, outbound_seq.next());
            let pcm = transcoder.resample(
                &frame.payload,
                REALTIME_SAMPLE_RATE_HZ,
                TELEPHONY_SAMPLE_RATE_HZ,
            );
            let legacy = transcoder.encode(&pcm);
            let frame = frame.transformed(Bytes::from(legacy), FrameEncoding::Legacy);
            send_frame(
                out_tx,
                OutboundFrame::media(stream_sid, BASE64_STANDARD.encode(&frame.payload)),
            )
            .await
        }

        SessionEvent::ToolCall {
            call_id,
            name,
            arguments,
        } => {
            info!(
                session_id = %call.session_id,
                %call_id,
                tool = %name,
                "agent invoked tool"
            );
            let Some(handle) = session.cloned() else {
                warn!(session_id = %call.session_id, "tool call with no live session");
                return true;
            };
            let client = rpc_client.cloned();
            let session_id = call.session_id.clone();
            tokio::spawn(async move {
                let output = run_tool_call(client.as_ref(), &name, &arguments).await;
                if let Err(e) = handle.submit_tool_result(&call_id, &output).await {
                    warn!(%session_id, %call_id, "failed to submit tool result: {e}");
                }
            });
            true
        }

        SessionEvent::Interrupted => {
            // Barge-in: flush agent audio the provider has buffered but not
            // yet played so the caller is not talked over.
            if let Some(stream_sid) = call.stream_sid.as_deref() {
                debug!(session_id = %call.session_id, "caller barge-in, clearing queued audio");
                return send_frame(out_tx, OutboundFrame::clear(stream_sid)).await;
            }
            true
        }

        SessionEvent::Error(e) => {
            warn!(session_id = %call.session_id, "realtime session error: {e}");
            true
        }

        SessionEvent::Closed => {
            info!(session_id = %call.session_id, "realtime session closed");
            false
        }
    }
}

/// Route one tool call through the RPC socket, serializing failures as an
/// error object so the agent always gets a correlated answer.
async fn run_tool_call(client: Option<&RpcClient>, name: &str, arguments: &str) -> String {
    let Some(client) = client else {
        return serde_json::json!({"error": "tool calls are disabled"}).to_string();
    };
    let args: Value = match serde_json::from_str(arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!(tool = %name, "unparseable tool arguments: {e}");
            return serde_json::json!({"error": format!("invalid arguments: {e}")}).to_string();
        }
    };
    match client.call(name, args).await {
        Ok(result) => result.to_string(),
        Err(e) => {
            warn!(tool = %name, "tool call failed: {e}");
            serde_json::json!({"error": e.to_string()}).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_calls_keep_their_terminal_state() {
        let mut call = CallSession::new();
        call.transition(CallState::MediaOpen);
        call.transition(CallState::Failed);
        finish_call(&mut call);
        assert_eq!(call.state, CallState::Failed);
    }

    #[test]
    fn live_calls_finish_closed() {
        let mut call = CallSession::new();
        call.transition(CallState::MediaOpen);
        call.transition(CallState::Bridging);
        finish_call(&mut call);
        assert_eq!(call.state, CallState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_outbound_queue_times_out() {
        let (tx, _rx) = mpsc::channel(1);
        // fill the queue; nobody drains it
        tx.send(Message::Text("x".into())).await.unwrap();
        assert!(!send_frame(&tx, OutboundFrame::clear("MZ1")).await);
    }

    #[tokio::test]
    async fn closed_outbound_queue_ends_the_call() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!send_frame(&tx, OutboundFrame::clear("MZ1")).await);
    }
}
