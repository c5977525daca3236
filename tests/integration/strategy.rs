//! Strategy switching with real fingerprint transports and a recorded browser.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use pretty_assertions::assert_eq;

use msu_trader::controller::{ControllerState, StrategyController};
use msu_trader::error::TransportError;
use msu_trader::session::RequestOptions;
use msu_trader::transport::{BrowserOptions, TransportVariant, VariantOptions};

use crate::support::{fingerprint_config, EngineFactory, RecordingEngine};

#[tokio::test]
async fn switch_to_browser_carries_session_cookies() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/swapnwarp/api/web/signin-wallet");
            then.status(200)
                .header("set-cookie", "wat=token-a; Path=/")
                .body("{}");
        })
        .await;

    let engine = Arc::new(RecordingEngine::new());
    let controller = StrategyController::new(EngineFactory::new(engine.clone()))
        .with_base_url(url::Url::parse(&server.base_url()).unwrap());
    controller.init(fingerprint_config()).await.unwrap();

    controller
        .post("/swapnwarp/api/web/signin-wallet", "{}", RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(controller.cookies().get("msu_wat").map(String::as_str), Some("token-a"));

    controller
        .switch(
            TransportVariant::Browser,
            Some(VariantOptions::Browser(BrowserOptions::headless(true))),
        )
        .await
        .unwrap();
    assert_eq!(controller.state(), ControllerState::Ready(TransportVariant::Browser));
    assert_eq!(engine.launches.load(Ordering::SeqCst), 1);

    controller
        .get("/marketplace/api/marketplace/items/9", RequestOptions::default())
        .await
        .unwrap();

    let installed = engine.installed();
    assert!(installed.contains(&("wat".to_string(), "token-a".to_string())));
    assert!(installed.contains(&("msu_wat".to_string(), "token-a".to_string())));

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.ends_with("/marketplace/api/marketplace/items/9"));
    assert!(requests[0]
        .headers
        .iter()
        .all(|(name, _)| !name.eq_ignore_ascii_case("cookie")));
}

#[tokio::test]
async fn browser_cookies_survive_switch_back_to_fingerprint() {
    let server = MockServer::start_async().await;
    let with_clearance = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/marketplace/api/marketplace/items/1")
                .header("cookie", "cf_clearance=solved");
            then.status(200).body("{}");
        })
        .await;

    let engine = Arc::new(RecordingEngine::new());
    let controller = StrategyController::new(EngineFactory::new(engine.clone()));
    controller
        .init(fingerprint_config().switched_to(TransportVariant::Browser, None))
        .await
        .unwrap();

    // Clearance cookie the site set inside the browser, never seen by a
    // response envelope.
    engine.site_cookie("cf_clearance", "solved");

    controller
        .switch(TransportVariant::Fingerprint, None)
        .await
        .unwrap();
    assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
    assert_eq!(controller.cookies().get("cf_clearance").map(String::as_str), Some("solved"));

    controller
        .get(
            &server.url("/marketplace/api/marketplace/items/1"),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    with_clearance.assert_async().await;
}

#[tokio::test]
async fn concurrent_browser_requests_never_overlap() {
    let engine = Arc::new(RecordingEngine::with_latency(Duration::from_millis(15)));
    let controller = Arc::new(StrategyController::new(EngineFactory::new(engine.clone())));
    controller
        .init(fingerprint_config().switched_to(TransportVariant::Browser, None))
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .get(&format!("https://msu.io/items/{i}"), RequestOptions::default())
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(engine.requests().len(), 8);
    assert_eq!(engine.max_in_flight(), 1);
}

#[tokio::test]
async fn abandoned_browser_request_still_holds_the_engine() {
    let engine = Arc::new(RecordingEngine::with_latency(Duration::from_millis(50)));
    let controller = Arc::new(StrategyController::new(EngineFactory::new(engine.clone())));
    controller
        .init(fingerprint_config().switched_to(TransportVariant::Browser, None))
        .await
        .unwrap();

    // Give up on the first request while the engine is still busy with it.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        controller.get("https://msu.io/first", RequestOptions::default()),
    )
    .await;
    assert!(abandoned.is_err());

    controller
        .get("https://msu.io/second", RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(engine.max_in_flight(), 1);
    assert_eq!(engine.requests().len(), 2);
}

#[tokio::test]
async fn requests_are_rejected_before_init_and_after_destroy() {
    let engine = Arc::new(RecordingEngine::new());
    let controller = StrategyController::new(EngineFactory::new(engine.clone()));

    let err = controller
        .get("https://msu.io/", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotReady(_)));

    controller
        .init(fingerprint_config().switched_to(TransportVariant::Browser, None))
        .await
        .unwrap();
    controller.cookie_jar().set("wat", "x");
    controller.destroy().await;
    controller.destroy().await;

    assert_eq!(controller.state(), ControllerState::Destroyed);
    assert!(controller.cookies().is_empty());
    assert_eq!(engine.closes.load(Ordering::SeqCst), 1);

    let err = controller
        .get("https://msu.io/", RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotReady(_)));
    assert!(matches!(
        controller.switch(TransportVariant::Fingerprint, None).await,
        Err(TransportError::NotReady(_))
    ));
}

#[tokio::test]
async fn switching_to_the_same_variant_rebuilds_the_transport() {
    let engine = Arc::new(RecordingEngine::new());
    let controller = StrategyController::new(EngineFactory::new(engine.clone()));
    controller
        .init(fingerprint_config().switched_to(TransportVariant::Browser, None))
        .await
        .unwrap();

    controller
        .switch(TransportVariant::Browser, None)
        .await
        .unwrap();

    assert_eq!(engine.launches.load(Ordering::SeqCst), 2);
    assert_eq!(engine.closes.load(Ordering::SeqCst), 1);
    assert!(controller.is_ready());
}

#[tokio::test]
async fn rotated_token_in_browser_wins_over_stale_alias() {
    let engine = Arc::new(RecordingEngine::reverse_listing());
    let controller = StrategyController::new(EngineFactory::new(engine.clone()));
    controller
        .init(fingerprint_config().switched_to(TransportVariant::Browser, None))
        .await
        .unwrap();
    controller.cookie_jar().set("wat", "old");

    engine.site_sets_on_next("wat", "new");
    controller
        .get(
            "https://msu.io/marketplace/api/marketplace/items/9",
            RequestOptions::default().cookie("once", "1"),
        )
        .await
        .unwrap();

    let cookies = controller.cookies();
    assert_eq!(cookies.get("wat").map(String::as_str), Some("new"));
    assert_eq!(cookies.get("msu_wat").map(String::as_str), Some("new"));
    assert!(!cookies.contains_key("once"));
}
