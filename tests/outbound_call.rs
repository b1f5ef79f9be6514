//! Outbound call placement against a mocked provider control plane.

use serde_json::json;
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbridge::telephony::{PlaceCall, TelephonyError, TwilioClient};
use callbridge::ServerConfig;

fn client_for(server: &MockServer) -> TwilioClient {
    TwilioClient::from_config(&ServerConfig {
        twilio_account_sid: Some("AC123".into()),
        twilio_auth_token: Some("secret".into()),
        twilio_from_number: Some("+15550100".into()),
        public_base_url: Some("https://bridge.example.com".into()),
        twilio_api_base: server.uri(),
        ..ServerConfig::default()
    })
}

#[tokio::test]
async fn place_call_posts_the_form_and_returns_the_sid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
        .and(header_exists("authorization"))
        .and(body_string_contains("To="))
        .and(body_string_contains("From="))
        .and(body_string_contains("Url=https%3A%2F%2Fbridge.example.com%2Fanswer"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "sid": "CA0123456789",
            "status": "queued",
            "to": "+15550123",
            "from": "+15550100"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sid = client_for(&server)
        .place_call(PlaceCall {
            to: "+15550123".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sid, "CA0123456789");
}

#[tokio::test]
async fn provider_rejection_surfaces_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"code": 21211, "message": "Invalid 'To' phone number"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .place_call(PlaceCall {
            to: "not-a-number".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    match err {
        TelephonyError::Provider { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("21211"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn status_callback_is_forwarded_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
        .and(body_string_contains("StatusCallback="))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"sid": "CA42", "status": "queued"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let sid = client_for(&server)
        .place_call(PlaceCall {
            to: "+15550123".into(),
            status_callback: Some("https://bridge.example.com/status".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sid, "CA42");
}

#[tokio::test]
async fn call_status_query_parses_the_resource() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2010-04-01/Accounts/AC123/Calls/CA42.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sid": "CA42",
            "status": "in-progress",
            "to": "+15550123",
            "from": "+15550100"
        })))
        .mount(&server)
        .await;

    let status = client_for(&server).get_call_status("CA42").await.unwrap();
    assert_eq!(status.sid, "CA42");
    assert_eq!(status.status, "in-progress");
}

#[tokio::test]
async fn unparseable_success_body_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Calls.json"))
        .respond_with(ResponseTemplate::new(201).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .place_call(PlaceCall {
            to: "+15550123".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TelephonyError::Provider { status: 201, .. }));
}
