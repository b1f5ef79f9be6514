//! Realtime session setup against a mocked negotiation endpoint.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbridge::core::realtime::{connect, connect_with_retry, RealtimeError, RealtimeSessionConfig};

fn config_for(api_base: String) -> RealtimeSessionConfig {
    RealtimeSessionConfig {
        api_key: "sk-test".into(),
        api_base,
        // Unroutable: these tests only exercise the negotiation phase.
        ws_base: "ws://127.0.0.1:1/v1".into(),
        model: "gpt-4o-realtime-preview".into(),
        voice: "alloy".into(),
        modalities: vec!["text".into(), "audio".into()],
        instructions: None,
        temperature: None,
        max_output_tokens: None,
        tools: Vec::new(),
        connect_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn failing_negotiation_is_terminal_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(3)
        .mount(&server)
        .await;

    let config = config_for(format!("{}/v1", server.uri()));
    let err = connect_with_retry(&config, 3).await.unwrap_err();
    match err {
        RealtimeError::Negotiation(message) => assert!(message.contains("500")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn negotiation_sends_bearer_auth_and_beta_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("openai-beta", "realtime=v1"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(format!("{}/v1", server.uri()));
    let err = connect_with_retry(&config, 1).await.unwrap_err();
    assert!(matches!(err, RealtimeError::Negotiation(_)));
}

#[tokio::test]
async fn missing_api_key_fails_fast_without_touching_the_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = config_for(format!("{}/v1", server.uri()));
    config.api_key = String::new();

    let err = connect_with_retry(&config, 3).await.unwrap_err();
    assert!(matches!(err, RealtimeError::MissingCredentials(_)));
}

#[tokio::test]
async fn malformed_negotiation_reply_counts_as_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(2)
        .mount(&server)
        .await;

    let config = config_for(format!("{}/v1", server.uri()));
    let err = connect_with_retry(&config, 2).await.unwrap_err();
    match err {
        RealtimeError::Negotiation(message) => assert!(message.contains("unparseable")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn socket_connect_failure_after_good_negotiation_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sess_1",
            "client_secret": {"value": "ek_test", "expires_at": 1700000000}
        })))
        .expect(2)
        .mount(&server)
        .await;

    // Negotiation succeeds but the session socket is unroutable.
    let config = config_for(format!("{}/v1", server.uri()));
    let err = connect_with_retry(&config, 2).await.unwrap_err();
    assert!(matches!(err, RealtimeError::ConnectionFailed(_)));
}

#[tokio::test]
async fn single_attempt_connect_does_not_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/sessions"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(format!("{}/v1", server.uri()));
    let err = connect(&config).await.unwrap_err();
    assert!(matches!(err, RealtimeError::Negotiation(_)));
}
