//! Fingerprint transport and session client against a local HTTP server.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use pretty_assertions::assert_eq;

use msu_trader::error::TransportError;
use msu_trader::session::{CookieJar, RequestOptions, SessionedClient};
use msu_trader::transport::{
    FingerprintTransport, Transport, TransportConfig, TransportVariant,
};

use crate::support::fingerprint_config;

async fn started(config: TransportConfig) -> SessionedClient {
    let transport = FingerprintTransport::new(config).unwrap();
    transport.init().await.unwrap();
    SessionedClient::new(Arc::new(transport), Arc::new(CookieJar::new()))
}

#[tokio::test]
async fn set_cookie_tokens_populate_aliases_and_are_sent_back() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/swapnwarp/api/web/signin-wallet");
            then.status(200)
                .header("set-cookie", "wat=access-1; Path=/; HttpOnly; Secure")
                .json_body(serde_json::json!({ "ok": true }));
        })
        .await;
    let session = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/marketplace/api/marketplace/items/1")
                .header("cookie", "msu_wat=access-1; wat=access-1");
            then.status(200).body("{}");
        })
        .await;

    let client = started(fingerprint_config()).await;
    client
        .post(
            &server.url("/swapnwarp/api/web/signin-wallet"),
            "{}",
            RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(client.jar().get("wat").as_deref(), Some("access-1"));
    assert_eq!(client.jar().get("msu_wat").as_deref(), Some("access-1"));

    let response = client
        .get(
            &server.url("/marketplace/api/marketplace/items/1"),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    login.assert_async().await;
    session.assert_async().await;
}

#[tokio::test]
async fn challenge_page_is_an_error_and_leaves_jar_untouched() {
    let server = MockServer::start_async().await;
    let blocked = server
        .mock_async(|when, then| {
            when.method(GET).path("/marketplace");
            then.status(403)
                .header("content-type", "text/html")
                .header("set-cookie", "__cf_bm=tracking; Path=/")
                .body("<html><head><title>Just a moment...</title></head><body>challenge-platform</body></html>");
        })
        .await;

    let client = started(fingerprint_config()).await;
    client.jar().set("session", "keep");

    let err = client
        .get(&server.url("/marketplace"), RequestOptions::default())
        .await
        .unwrap_err();

    match &err {
        TransportError::ChallengeDetected { status, .. } => assert_eq!(*status, 403),
        other => panic!("expected challenge, got {other:?}"),
    }
    assert!(err.suggests_switch());
    assert_eq!(client.jar().len(), 1);
    assert_eq!(client.jar().get("__cf_bm"), None);
    blocked.assert_async().await;
}

#[tokio::test]
async fn explicit_cookie_overrides_jar_for_one_request() {
    let server = MockServer::start_async().await;
    let overridden = server
        .mock_async(|when, then| {
            when.path("/once").header("cookie", "msu_wat=override; wat=stored");
            then.status(200);
        })
        .await;
    let normal = server
        .mock_async(|when, then| {
            when.path("/after").header("cookie", "msu_wat=stored; wat=stored");
            then.status(200);
        })
        .await;

    let client = started(fingerprint_config()).await;
    client.jar().set("wat", "stored");

    client
        .get(
            &server.url("/once"),
            RequestOptions::default().cookie("msu_wat", "override"),
        )
        .await
        .unwrap();
    client
        .get(&server.url("/after"), RequestOptions::default())
        .await
        .unwrap();

    overridden.assert_async().await;
    normal.assert_async().await;
    assert_eq!(client.jar().get("msu_wat").as_deref(), Some("stored"));
}

#[tokio::test]
async fn default_and_request_headers_are_sent() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/swapnwarp/api/web/message")
                .header("origin", "https://msu.io")
                .header("x-msu-address", "0xabc")
                .header("content-type", "application/json")
                .header_exists("user-agent");
            then.status(200).body(r#"{"message":"hi"}"#);
        })
        .await;

    let client = started(fingerprint_config()).await;
    let response = client
        .post(
            &server.url("/swapnwarp/api/web/message"),
            r#"{"address":"0xabc"}"#,
            RequestOptions::default().header("x-msu-address", "0xabc"),
        )
        .await
        .unwrap();

    assert_eq!(response.json::<serde_json::Value>().unwrap()["message"], "hi");
    mock.assert_async().await;
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/slow");
            then.status(200).delay(Duration::from_millis(800));
        })
        .await;

    let config = TransportConfig::new(TransportVariant::Fingerprint, Duration::from_millis(100));
    let client = started(config).await;
    let err = client
        .get(&server.url("/slow"), RequestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Timeout { timeout_ms: 100, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn requests_after_destroy_are_rejected() {
    let transport = FingerprintTransport::new(fingerprint_config()).unwrap();
    transport.init().await.unwrap();
    transport.destroy().await;
    transport.destroy().await;

    let err = transport
        .request(msu_trader::transport::RequestSpec::get("http://127.0.0.1:1/"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotReady(_)));
}
