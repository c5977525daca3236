//! Venue client flows against a mocked marketplace.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use httpmock::prelude::*;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::json;

use msu_trader::controller::StrategyController;
use msu_trader::error::{TransportError, VenueError};
use msu_trader::signing::create_signer;
use msu_trader::transport::{FingerprintOptions, TransportVariant, VariantOptions};
use msu_trader::venue::{
    AuthTokens, FallbackPolicy, OrderParams, VenueClient, VenueSettings, NOT_READY_FOR_SALE,
    RECENTLY_LISTED,
};

use crate::support::{fingerprint_config, EngineFactory, RecordingEngine, TEST_KEY};

fn settings() -> VenueSettings {
    VenueSettings {
        concurrent_interval: Duration::from_millis(1),
        require_confirmation: true,
        listing_cooldown: Duration::ZERO,
        failure_backoff: Duration::ZERO,
    }
}

async fn venue(server: &MockServer, engine: Arc<RecordingEngine>) -> VenueClient {
    let controller = Arc::new(StrategyController::new(EngineFactory::new(engine)));
    controller.init(fingerprint_config()).await.unwrap();
    VenueClient::new(controller, create_signer(TEST_KEY).unwrap(), server.base_url())
        .with_settings(settings())
}

fn tokens() -> AuthTokens {
    AuthTokens {
        wat: "access".to_string(),
        wrt: "refresh".to_string(),
        wat_expire_at: None,
        wrt_expire_at: None,
    }
}

#[tokio::test]
async fn login_signs_the_challenge_and_stores_tokens() {
    let server = MockServer::start_async().await;
    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    let address = client.address().to_string();

    let message = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/swapnwarp/api/web/message")
                .json_body(json!({ "address": address }));
            then.status(200)
                .json_body(json!({ "message": "Welcome to MSU. Nonce: 42" }));
        })
        .await;
    let signin = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/swapnwarp/api/web/signin-wallet")
                .header("x-msu-address", &address)
                .body_includes("WALLET_TYPE_METAMASK")
                .body_includes("\"signature\":\"0x");
            then.status(200).json_body(json!({
                "wat": "access-token",
                "wrt": "refresh-token",
                "watExpireAt": 1_700_000_000,
                "wrtExpireAt": "2030-01-01T00:00:00Z"
            }));
        })
        .await;

    assert!(!client.is_authenticated());
    let tokens = client.login().await.unwrap();

    assert_eq!(tokens.wat, "access-token");
    assert_eq!(tokens.wat_expire_at.as_deref(), Some("1700000000"));
    assert!(client.is_authenticated());
    let cookies = client.controller().cookies();
    assert_eq!(cookies.get("msu_wat").map(String::as_str), Some("access-token"));
    assert_eq!(cookies.get("msu_wrt").map(String::as_str), Some("refresh-token"));

    message.assert_async().await;
    signin.assert_async().await;

    client.clear_auth();
    assert!(!client.is_authenticated());
    assert!(client.controller().cookies().is_empty());
}

#[tokio::test]
async fn orders_need_confirmation_and_a_session() {
    let server = MockServer::start_async().await;
    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    let params = OrderParams::units("1001", dec!(1));

    assert!(matches!(
        client.place_buy_order(&params, false).await,
        Err(VenueError::ConfirmationRequired)
    ));
    assert!(matches!(
        client.place_offer(&params, true).await,
        Err(VenueError::Unauthenticated)
    ));
}

#[tokio::test]
async fn sell_order_is_signed_and_posted_to_register() {
    let server = MockServer::start_async().await;
    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    client.set_auth_tokens(tokens());
    let maker = client.address().to_string();

    let register = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/marketplace/api/marketplace/items/1001/register")
                .header("cookie", "msu_wat=access; msu_wrt=refresh; wat=access; wrt=refresh")
                .body_includes("\"isSeller\":true")
                .body_includes(format!("\"maker\":\"{maker}\""))
                .body_includes("\"tokenAmount\":\"2500000000000000000\"")
                .body_includes("\"orderSign\":\"0x");
            then.status(200).json_body(json!({ "success": true }));
        })
        .await;

    let receipt = client
        .place_sell_order(&OrderParams::units("1001", dec!(2.5)), true)
        .await
        .unwrap();

    assert_eq!(receipt["success"], true);
    register.assert_async().await;
}

#[tokio::test]
async fn buy_before_cooldown_is_not_for_sale() {
    let server = MockServer::start_async().await;
    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    client.set_auth_tokens(tokens());

    server
        .mock_async(|when, then| {
            when.method(POST).path("/marketplace/api/marketplace/items/77/buy");
            then.status(400)
                .json_body(json!({ "message": NOT_READY_FOR_SALE }));
        })
        .await;

    let err = client
        .place_buy_order(&OrderParams::units("77", dec!(10)), true)
        .await
        .unwrap_err();
    assert!(matches!(err, VenueError::NotForSale { ref token_id, .. } if token_id == "77"));
}

#[tokio::test]
async fn status_codes_map_to_venue_errors() {
    let server = MockServer::start_async().await;
    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    client.set_auth_tokens(tokens());

    server
        .mock_async(|when, then| {
            when.path("/marketplace/api/marketplace/items/5/offer");
            then.status(429).body("slow down");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.path("/marketplace/api/marketplace/items/6");
            then.status(500).body("boom");
        })
        .await;

    assert!(matches!(
        client
            .place_offer(&OrderParams::units("5", dec!(1)), true)
            .await,
        Err(VenueError::RateLimited { operation: "offer" })
    ));
    assert!(matches!(
        client.item_details("6").await,
        Err(VenueError::UnexpectedStatus { status: 500, .. })
    ));
}

#[tokio::test]
async fn item_details_and_explore_parse_listing_times() {
    let server = MockServer::start_async().await;
    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    let address = client.address().to_string();

    server
        .mock_async(|when, then| {
            when.method(GET).path("/marketplace/api/marketplace/items/42");
            then.status(200).json_body(json!({
                "name": "Sword",
                "salesInfo": { "createdAt": "2023-11-14T22:13:20Z", "priceWei": "1" }
            }));
        })
        .await;
    let explore = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/marketplace/api/marketplace/explore/items")
                .json_body(json!({
                    "filter": { "name": "" },
                    "sorting": RECENTLY_LISTED,
                    "walletAddr": address
                }));
            then.status(200).json_body(json!({
                "items": [
                    {
                        "name": "Sword",
                        "data": { "itemId": 5001 },
                        "salesInfo": {
                            "tokenId": "42",
                            "priceWei": "1000000000000000000",
                            "createdAt": "2023-11-14T22:13:20Z"
                        }
                    },
                    {
                        "name": "Broken",
                        "data": { "itemId": "5002" },
                        "salesInfo": { "tokenId": 43, "createdAt": "not a time" }
                    }
                ]
            }));
        })
        .await;

    let details = client.item_details("42").await.unwrap();
    assert_eq!(details.created_at_ts, 1_700_000_000);
    assert_eq!(details.data["createdAtTs"], 1_700_000_000);
    assert_eq!(details.data["name"], "Sword");

    let items = client
        .explore_items(json!({ "name": "" }), RECENTLY_LISTED)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "5001");
    assert_eq!(items[0].token_id, "42");
    assert_eq!(items[0].price_wei.as_deref(), Some("1000000000000000000"));
    assert_eq!(items[0].minimum_price_wei, None);
    assert_eq!(items[0].created_at_ts, 1_700_000_000);
    explore.assert_async().await;
}

#[tokio::test]
async fn challenge_triggers_fallback_to_browser_and_one_retry() {
    let server = MockServer::start_async().await;
    let blocked = server
        .mock_async(|when, then| {
            when.path("/marketplace/api/marketplace/items/42");
            then.status(403)
                .header("cf-mitigated", "challenge")
                .body("<html></html>");
        })
        .await;

    let engine = Arc::new(RecordingEngine::new());
    engine.reply(
        200,
        r#"{"salesInfo":{"createdAt":"2023-11-14T22:13:20Z"}}"#,
    );
    let client = venue(&server, engine.clone())
        .await
        .with_fallback(FallbackPolicy::switch_to(TransportVariant::Browser, None));

    let details = client.item_details("42").await.unwrap();

    assert_eq!(details.created_at_ts, 1_700_000_000);
    assert_eq!(client.strategy_info().variant, Some(TransportVariant::Browser));
    assert_eq!(engine.requests().len(), 1);
    blocked.assert_hits_async(1).await;
}

#[tokio::test]
async fn challenge_without_fallback_surfaces_the_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/marketplace/api/marketplace/items/42");
            then.status(403)
                .header("cf-mitigated", "challenge")
                .body("<html></html>");
        })
        .await;

    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    let err = client.item_details("42").await.unwrap_err();

    assert!(matches!(
        err.transport(),
        Some(TransportError::ChallengeDetected { status: 403, .. })
    ));
    assert_eq!(client.strategy_info().variant, Some(TransportVariant::Fingerprint));
}

#[tokio::test]
async fn market_burst_returns_first_success() {
    let server = MockServer::start_async().await;
    let buy = server
        .mock_async(|when, then| {
            when.method(POST).path("/marketplace/api/marketplace/items/900/buy");
            then.status(200).json_body(json!({ "success": true }));
        })
        .await;

    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    client.set_auth_tokens(tokens());

    let listed_long_ago = Utc::now().timestamp() - 3600;
    let receipt = client
        .place_market_order_burst(&OrderParams::units("900", dec!(3)), listed_long_ago, 3, true)
        .await
        .unwrap();

    assert_eq!(receipt["success"], true);
    assert!(buy.hits_async().await >= 1);
}

#[tokio::test]
async fn market_burst_reports_last_error_when_every_attempt_fails() {
    let server = MockServer::start_async().await;
    let buy = server
        .mock_async(|when, then| {
            when.method(POST).path("/marketplace/api/marketplace/items/901/buy");
            then.status(500).body("down");
        })
        .await;

    let client = venue(&server, Arc::new(RecordingEngine::new())).await;
    client.set_auth_tokens(tokens());

    let err = client
        .place_market_order_burst(
            &OrderParams::units("901", dec!(3)),
            Utc::now().timestamp() - 3600,
            4,
            true,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, VenueError::UnexpectedStatus { status: 500, .. }));
    buy.assert_hits_async(4).await;
}

#[tokio::test]
async fn switch_strategy_passes_through() {
    let server = MockServer::start_async().await;
    let engine = Arc::new(RecordingEngine::new());
    let client = venue(&server, engine).await;
    client.set_auth_tokens(tokens());

    client
        .switch_strategy(
            TransportVariant::Browser,
            Some(VariantOptions::Browser(Default::default())),
        )
        .await
        .unwrap();

    let info = client.strategy_info();
    assert_eq!(info.variant, Some(TransportVariant::Browser));
    assert!(info.is_ready);
    assert_eq!(info.cookie_count, 4);
    assert!(!info.uses_proxy);

    client
        .switch_strategy(
            TransportVariant::Fingerprint,
            Some(VariantOptions::Fingerprint(FingerprintOptions {
                proxies: vec!["127.0.0.1:9".to_string()],
                ..Default::default()
            })),
        )
        .await
        .unwrap();
    let info = client.strategy_info();
    assert_eq!(info.proxy_count, 1);
    assert!(info.uses_proxy);
}
