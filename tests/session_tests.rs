//! Session lifecycle against a mock PDS: proactive refresh, refresh
//! idempotence within a token lifetime, and reconnect on invalid-token
//! rejection.

mod common;

use common::{client_settings, make_jwt, mount_create_session};
use palisade::atproto::client::Client;
use palisade::metrics::NoOpMetricsPublisher;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tokens_json(access: &str, refresh: &str) -> serde_json::Value {
    serde_json::json!({ "accessJwt": access, "refreshJwt": refresh })
}

fn emit_event_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "createdAt": "2025-06-01T00:00:00Z",
        "id": 42,
        "createdBy": "did:plc:operator",
    }))
}

#[tokio::test]
async fn write_refreshes_token_inside_expiry_buffer() {
    let server = MockServer::start().await;

    // The initial access token expires inside the 2-minute buffer, so the
    // first write must refresh before the wire send
    let stale_access = make_jwt(30);
    let refresh = make_jwt(3600);
    let fresh_access = make_jwt(3600);
    let next_refresh = make_jwt(7200);

    mount_create_session(&server, &stale_access, &refresh, 1).await;

    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.refreshSession"))
        .and(header("Authorization", format!("Bearer {refresh}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(tokens_json(&fresh_access, &next_refresh)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/xrpc/tools.ozone.moderation.emitEvent"))
        .and(header("Authorization", format!("Bearer {fresh_access}")))
        .respond_with(emit_event_response())
        .expect(2)
        .mount(&server)
        .await;

    let client = Client::new(client_settings(&server, false), Arc::new(NoOpMetricsPublisher::new()));
    client.connect().await.expect("connect succeeds");
    assert!(client.is_ready());

    // Two writes, one refresh: the rotated token covers both
    client
        .label_account("did:plc:subject", vec!["spam".to_string()])
        .await
        .expect("first label succeeds");
    client
        .label_account("did:plc:subject", vec!["spam".to_string()])
        .await
        .expect("second label succeeds");

    server.verify().await;
}

#[tokio::test]
async fn no_refresh_while_token_is_fresh() {
    let server = MockServer::start().await;

    let access = make_jwt(3600);
    let refresh = make_jwt(86400);
    mount_create_session(&server, &access, &refresh, 1).await;

    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.refreshSession"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/xrpc/tools.ozone.moderation.emitEvent"))
        .and(header("Authorization", format!("Bearer {access}")))
        .respond_with(emit_event_response())
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(client_settings(&server, false), Arc::new(NoOpMetricsPublisher::new()));
    client.connect().await.expect("connect succeeds");
    client
        .label_account("did:plc:subject", vec!["spam".to_string()])
        .await
        .expect("label succeeds");

    server.verify().await;
}

#[tokio::test]
async fn invalid_token_on_refresh_reconnects_and_write_proceeds() {
    let server = MockServer::start().await;

    let stale_access = make_jwt(30);
    let stale_refresh = make_jwt(3600);
    let fresh_access = make_jwt(3600);
    let fresh_refresh = make_jwt(86400);

    // First login hands out a near-expiry pair; the re-login after the
    // rejected refresh hands out a fresh pair
    let logins = AtomicU32::new(0);
    let first = tokens_json(&stale_access, &stale_refresh);
    let second = tokens_json(&fresh_access, &fresh_refresh);
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(move |_request: &wiremock::Request| {
            let call = logins.fetch_add(1, Ordering::SeqCst);
            let body = if call == 0 { first.clone() } else { second.clone() };
            ResponseTemplate::new(200).set_body_json(body)
        })
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.refreshSession"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"error":"InvalidToken","message":"Token could not be verified"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/xrpc/tools.ozone.moderation.emitEvent"))
        .and(header("Authorization", format!("Bearer {fresh_access}")))
        .respond_with(emit_event_response())
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(client_settings(&server, false), Arc::new(NoOpMetricsPublisher::new()));
    client.connect().await.expect("connect succeeds");

    // Refresh gets rejected, the session reconnects with the stored
    // credentials, and the original write goes out under the new token
    client
        .label_account("did:plc:subject", vec!["spam".to_string()])
        .await
        .expect("label succeeds after reconnect");

    server.verify().await;
}
