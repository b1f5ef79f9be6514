//! End-to-end media bridge tests: a real WebSocket client plays the telephony
//! provider, with the realtime speech provider faked in-process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbridge::tools::builtin_registry;
use callbridge::{routes, AppState, ServerConfig};

async fn serve_app(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config, Arc::new(builtin_registry()));
    let app = routes::router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn start_frame() -> Message {
    Message::Text(
        json!({
            "event": "start",
            "start": {"streamSid": "MZ1", "callSid": "CA1"}
        })
        .to_string()
        .into(),
    )
}

/// Fake speech provider socket: acknowledges session setup and echoes caller
/// audio back as agent audio.
async fn fake_realtime_provider(listener: TcpListener) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => continue,
        };
        match frame["type"].as_str() {
            Some("session.update") => {
                let created = json!({
                    "type": "session.created",
                    "session": {"id": "sess_fake"}
                });
                if ws.send(Message::Text(created.to_string().into())).await.is_err() {
                    return;
                }
            }
            Some("input_audio_buffer.append") => {
                let delta = json!({
                    "type": "response.audio.delta",
                    "delta": frame["audio"].clone()
                });
                if ws.send(Message::Text(delta.to_string().into())).await.is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn bridged_call_relays_audio_both_ways() {
    let negotiation = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sess_fake",
            "client_secret": {"value": "ek_fake"}
        })))
        .mount(&negotiation)
        .await;

    let provider_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let provider_addr = provider_listener.local_addr().unwrap();
    tokio::spawn(fake_realtime_provider(provider_listener));

    let (addr, state) = serve_app(ServerConfig {
        voice_enabled: Some(true),
        tools_rpc_enabled: Some(false),
        public_base_url: Some("https://bridge.example.com".into()),
        openai_api_key: Some("sk-test".into()),
        twilio_account_sid: Some("AC1".into()),
        twilio_auth_token: Some("t".into()),
        realtime_api_base: format!("{}/v1", negotiation.uri()),
        realtime_ws_base: format!("ws://{provider_addr}"),
        ..ServerConfig::default()
    })
    .await;

    let (mut caller, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/media"))
        .await
        .unwrap();
    caller.send(start_frame()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while state.calls.active_count() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("call was not registered");

    // The bridge comes up concurrently; keep offering audio until the echo
    // arrives on the telephony leg.
    let payload = "AQIDBAUGBwg=";
    let media_frame = json!({"event": "media", "media": {"payload": payload}}).to_string();
    let echoed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            caller
                .send(Message::Text(media_frame.clone().into()))
                .await
                .unwrap();
            match tokio::time::timeout(Duration::from_millis(100), caller.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["event"] == "media" {
                        break frame;
                    }
                }
                Ok(Some(Ok(_))) | Err(_) => continue,
                Ok(Some(Err(e))) => panic!("caller socket error: {e}"),
                Ok(None) => panic!("caller socket closed before audio came back"),
            }
        }
    })
    .await
    .expect("no agent audio within 10s");

    // Passthrough transcode end to end: the payload survives unchanged.
    assert_eq!(echoed["media"]["payload"], payload);
    assert_eq!(echoed["streamSid"], "MZ1");

    // Hangup: the provider-side stop tears the call down and releases it.
    caller
        .send(Message::Text(
            json!({"event": "stop", "stop": {"callSid": "CA1"}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while state.calls.active_count() != 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("call was not released after stop");
}

#[tokio::test]
async fn failed_bridge_sends_explicit_termination() {
    // No speech credential configured: negotiation fails fatally and fast.
    let (addr, _state) = serve_app(ServerConfig {
        voice_enabled: Some(true),
        tools_rpc_enabled: Some(false),
        public_base_url: Some("https://bridge.example.com".into()),
        twilio_account_sid: Some("AC1".into()),
        twilio_auth_token: Some("t".into()),
        ..ServerConfig::default()
    })
    .await;

    let (mut caller, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/media"))
        .await
        .unwrap();
    caller.send(start_frame()).await.unwrap();

    // Expect a named mark, then a close frame. Never a silent drop.
    let mut saw_mark = false;
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = caller.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["event"] == "mark" {
                        assert_eq!(frame["mark"]["name"], "bridge-failed");
                        saw_mark = true;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "socket was not closed after bridge failure");
    assert!(saw_mark, "no bridge-failed mark before close");
}
