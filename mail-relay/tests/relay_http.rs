//! Integration tests for the relay endpoint
//!
//! Drives the full router against in-memory stores.

use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum_test::multipart::MultipartForm;
use axum_test::TestServer;
use mail_relay::config::RelayConfig;
use mail_relay::handlers::router;
use mail_relay::testing::{ScriptedMailer, TestRelay};
use serde_json::{json, Value};

fn server(mailer: ScriptedMailer) -> (TestServer, TestRelay) {
    let relay = TestRelay::new(RelayConfig::default(), mailer);
    let server = TestServer::new(router(relay.state.clone())).unwrap();
    (server, relay)
}

fn forwarded_for(value: &'static str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-forwarded-for"),
        HeaderValue::from_static(value),
    )
}

#[tokio::test]
async fn test_get_applies_defaults() {
    let (server, relay) = server(ScriptedMailer::accepting_all());
    let (name, value) = forwarded_for("10.1.1.1, 203.0.113.50");

    let response = server
        .get("/")
        .add_query_params(&[
            ("user", "user@example.com"),
            ("subject", "验证码"),
            ("body", "<p>123456</p>"),
        ])
        .add_header(name, value)
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({"success": true, "info": "Message has been sent"})
    );

    let records = relay.audit.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.ip, "203.0.113.50");
    assert_eq!(record.user, "user@example.com");
    assert_eq!(record.subject, "验证码");
    assert_eq!(record.altbody, "<p>123456</p>");
    assert_eq!(record.team_name, "Libv 团队");
    assert_eq!(record.mailid.get(), 1);
}

#[tokio::test]
async fn test_empty_body_is_copied_to_altbody() {
    let (server, relay) = server(ScriptedMailer::accepting_all());

    server
        .post("/")
        .json(&json!({"user": "user@example.com", "subject": "s", "body": ""}))
        .await
        .assert_status_ok();

    let record = &relay.audit.records()[0];
    assert_eq!(record.body, "");
    assert_eq!(record.altbody, "");
}

#[tokio::test]
async fn test_rotates_until_a_sender_accepts() {
    let (server, relay) = server(ScriptedMailer::accepting(["smtp3.localhost"]));

    let response = server
        .post("/")
        .json(&json!({
            "user": "user@example.com",
            "subject": "Hello",
            "body": "<p>Hi</p>",
            "altbody": "Hi",
            "tname": "Ops",
        }))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({"success": true, "info": "Message has been sent"})
    );

    let records = relay.audit.records();
    let ids: Vec<u32> = records.iter().map(|r| r.mailid.get()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(records.iter().all(|r| r.team_name == "Ops" && r.altbody == "Hi"));
    assert_eq!(relay.rotator.current().map(|id| id.get()), Some(3));

    let sent = relay.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "smtp3.localhost");
}

#[tokio::test]
async fn test_all_senders_rejecting() {
    let (server, relay) = server(ScriptedMailer::rejecting_all());

    let response = server
        .post("/")
        .json(&json!({"user": "user@example.com", "subject": "s", "body": "b"}))
        .await;

    // Delivery failure is still a 200
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({
            "success": false,
            "info": "Message could not be sent. Mailer Error: smtp3.localhost rejected the message",
        })
    );
    assert_eq!(relay.audit.len(), 3);
    assert_eq!(relay.mailer.sent_count(), 0);
}

#[tokio::test]
async fn test_rotation_continues_across_requests() {
    let (server, relay) = server(ScriptedMailer::accepting_all());

    for _ in 0..6 {
        server
            .get("/")
            .add_query_param("user", "user@example.com")
            .await
            .assert_status_ok();
    }

    let ids: Vec<u32> = relay.audit.records().iter().map(|r| r.mailid.get()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 1]);
}

#[tokio::test]
async fn test_unsupported_methods() {
    let (server, relay) = server(ScriptedMailer::accepting_all());

    for method in [Method::PUT, Method::DELETE, Method::PATCH] {
        let response = server
            .method(method, "/")
            .json(&json!({"user": "user@example.com"}))
            .await;
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        response.assert_text("Method not allowed");
    }

    assert!(relay.audit.is_empty());
    assert_eq!(relay.mailer.sent_count(), 0);
}

#[tokio::test]
async fn test_invalid_json() {
    let (server, relay) = server(ScriptedMailer::accepting_all());

    let response = server
        .post("/")
        .bytes(Bytes::from_static(b"{\"user\": "))
        .content_type("application/json")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("Invalid JSON format");
    assert!(relay.audit.is_empty());
}

#[tokio::test]
async fn test_missing_recipient() {
    let (server, relay) = server(ScriptedMailer::accepting_all());

    let response = server.post("/").json(&json!({"subject": "no one"})).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("Missing recipient");
    assert!(relay.audit.is_empty());
}

#[tokio::test]
async fn test_multipart_body() {
    let (server, relay) = server(ScriptedMailer::accepting_all());

    let form = MultipartForm::new()
        .add_text("user", "user@example.com")
        .add_text("subject", "Multipart")
        .add_text("body", "<b>hi</b>")
        .add_text("tname", "Libv 客服");

    let response = server.post("/").multipart(form).await;

    response.assert_status_ok();
    let record = &relay.audit.records()[0];
    assert_eq!(record.subject, "Multipart");
    assert_eq!(record.team_name, "Libv 客服");
    assert_eq!(record.altbody, "<b>hi</b>");
}

#[tokio::test]
async fn test_urlencoded_body() {
    let (server, relay) = server(ScriptedMailer::accepting_all());

    let response = server
        .post("/")
        .form(&[
            ("user", "user@example.com"),
            ("subject", "Form"),
            ("body", "b"),
            ("altbody", "plain"),
        ])
        .await;

    response.assert_status_ok();
    let record = &relay.audit.records()[0];
    assert_eq!(record.subject, "Form");
    assert_eq!(record.altbody, "plain");
}

#[tokio::test]
async fn test_configured_team_name_and_budget() {
    let mut config = RelayConfig::default();
    config.delivery.default_team_name = "Support".to_string();
    config.delivery.max_attempts = 2;
    let relay = TestRelay::new(config, ScriptedMailer::rejecting_all());
    let server = TestServer::new(router(relay.state.clone())).unwrap();

    let response = server
        .get("/")
        .add_query_param("user", "user@example.com")
        .await;

    assert_eq!(response.json::<Value>()["success"], json!(false));
    let records = relay.audit.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.team_name == "Support"));
}
