use std::sync::Arc;
use std::time::Duration;

use application::{EmailDispatcher, EmailError, OutboundEmail};
use domain::EmailAddress;
use infrastructure::{HttpEmailDispatcher, ResilientEmailDispatcher};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn email() -> OutboundEmail {
    OutboundEmail {
        to: EmailAddress::parse("wali@example.com").expect("email"),
        subject: "Conversation update".into(),
        html: "<p>10 messages</p>".into(),
    }
}

fn dispatcher(
    server: &MockServer,
    timeout: Duration,
    max_attempts: u32,
) -> ResilientEmailDispatcher {
    let http = HttpEmailDispatcher::new(
        format!("{}/emails", server.uri()),
        Some("test-key".into()),
        "no-reply@example.com",
    )
    .expect("client");
    ResilientEmailDispatcher::new(Arc::new(http), timeout, max_attempts, Duration::from_millis(5))
}

#[tokio::test]
async fn posts_json_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "from": "no-reply@example.com",
            "to": ["wali@example.com"],
            "subject": "Conversation update"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_1" })))
        .expect(1)
        .mount(&server)
        .await;

    dispatcher(&server, Duration::from_secs(2), 3)
        .send(&email())
        .await
        .expect("delivered");
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    dispatcher(&server, Duration::from_secs(2), 3)
        .send(&email())
        .await
        .expect("delivered on third attempt");
}

#[tokio::test]
async fn rejected_messages_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid recipient"))
        .expect(1)
        .mount(&server)
        .await;

    let err = dispatcher(&server, Duration::from_secs(2), 3)
        .send(&email())
        .await
        .unwrap_err();
    assert!(
        matches!(err, EmailError::Rejected(ref reason) if reason.contains("invalid recipient"))
    );
}

#[tokio::test]
async fn slow_provider_times_out_after_all_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let err = dispatcher(&server, Duration::from_millis(50), 2)
        .send(&email())
        .await
        .unwrap_err();
    assert_eq!(err, EmailError::Timeout(Duration::from_millis(50)));
}
