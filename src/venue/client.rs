//! Marketplace client on top of the strategy controller.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use super::order::{build_order, parse_created_at};
use super::types::{
    AuthTokens, ExploreResponse, ItemDetails, ListedItem, OrderKind, OrderParams,
    OrderSubmission,
};
use crate::controller::{ControllerDescription, StrategyController};
use crate::error::{TransportError, VenueError};
use crate::metrics;
use crate::session::RequestOptions;
use crate::signing;
use crate::transport::{ResponseEnvelope, TransportVariant, VariantOptions};

/// Venue message for a listing still inside its cooldown.
pub const NOT_READY_FOR_SALE: &str = "purchase blocked: the product is not ready for sale yet";

const MESSAGE_PATH: &str = "/swapnwarp/api/web/message";
const SIGNIN_PATH: &str = "/swapnwarp/api/web/signin-wallet";
const ITEMS_PATH: &str = "/marketplace/api/marketplace/items";
const EXPLORE_PATH: &str = "/marketplace/api/marketplace/explore/items";

const WALLET_TYPE: &str = "WALLET_TYPE_METAMASK";

/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Tunables for order placement.
#[derive(Debug, Clone)]
pub struct VenueSettings {
    /// Stagger between burst attempts.
    pub concurrent_interval: Duration,
    /// Refuse real orders unless the caller confirms them.
    pub require_confirmation: bool,
    /// How long after listing an item becomes purchasable.
    pub listing_cooldown: Duration,
    /// Pause after a failed burst attempt before it reports.
    pub failure_backoff: Duration,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            concurrent_interval: Duration::from_millis(10),
            require_confirmation: true,
            listing_cooldown: Duration::from_secs(30),
            failure_backoff: Duration::from_secs(5),
        }
    }
}

/// Automatic strategy switch on challenge pages.
#[derive(Debug, Clone, Default)]
pub struct FallbackPolicy {
    /// Variant (and options) to switch to when a call hits a challenge.
    pub on_challenge: Option<(TransportVariant, Option<VariantOptions>)>,
}

impl FallbackPolicy {
    /// Never switch.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Switch to `variant` on challenge.
    pub fn switch_to(variant: TransportVariant, options: Option<VariantOptions>) -> Self {
        Self {
            on_challenge: Some((variant, options)),
        }
    }
}

/// Authenticated marketplace session.
pub struct VenueClient {
    controller: Arc<StrategyController>,
    signer: PrivateKeySigner,
    address: String,
    base_url: String,
    auth: RwLock<Option<AuthTokens>>,
    fallback: FallbackPolicy,
    settings: VenueSettings,
}

impl VenueClient {
    /// Client for the wallet behind `signer`. The controller must already be
    /// initialized before any call is made.
    pub fn new(
        controller: Arc<StrategyController>,
        signer: PrivateKeySigner,
        base_url: impl Into<String>,
    ) -> Self {
        let address = signer.address().to_checksum(None);
        Self {
            controller,
            signer,
            address,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: RwLock::new(None),
            fallback: FallbackPolicy::default(),
            settings: VenueSettings::default(),
        }
    }

    /// Set the challenge fallback.
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Set order placement tunables.
    pub fn with_settings(mut self, settings: VenueSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Checksummed wallet address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Underlying controller.
    pub fn controller(&self) -> &Arc<StrategyController> {
        &self.controller
    }

    // === Authentication ===

    /// Sign in with the wallet and store the issued session tokens.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn login(&self) -> Result<AuthTokens, VenueError> {
        let started = Instant::now();

        let body = json!({ "address": self.address });
        let response = self
            .call_with_fallback(|| self.post_json("login_message", MESSAGE_PATH, &body, "/swapnwarp", false))
            .await?;
        let message = response
            .json::<Value>()
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| VenueError::Parse {
                operation: "login_message",
                reason: "no message field".to_string(),
            })?;

        let signature = signing::sign_login_message(&self.signer, &message).await?;
        let body = json!({
            "address": self.address,
            "signature": signature,
            "walletType": WALLET_TYPE,
        });
        let response = self
            .call_with_fallback(|| self.post_json("login", SIGNIN_PATH, &body, "/swapnwarp", true))
            .await?;

        let tokens: AuthTokens = response.json().map_err(|e| VenueError::Parse {
            operation: "login",
            reason: format!("no session tokens in response: {e}"),
        })?;
        self.set_auth_tokens(tokens.clone());

        metrics::record_venue_latency(started, "login");
        info!(
            wat_expire_at = tokens.wat_expire_at.as_deref().unwrap_or("-"),
            "Logged in"
        );
        Ok(tokens)
    }

    /// Install session tokens obtained elsewhere.
    pub fn set_auth_tokens(&self, tokens: AuthTokens) {
        let jar = self.controller.cookie_jar();
        jar.set("wat", tokens.wat.clone());
        jar.set("wrt", tokens.wrt.clone());
        *self.auth.write() = Some(tokens);
    }

    /// Current session tokens.
    pub fn auth_tokens(&self) -> Option<AuthTokens> {
        self.auth.read().clone()
    }

    /// Whether both session tokens are present.
    pub fn is_authenticated(&self) -> bool {
        self.auth
            .read()
            .as_ref()
            .is_some_and(|t| !t.wat.is_empty() && !t.wrt.is_empty())
    }

    /// Forget the session: tokens and every stored cookie.
    pub fn clear_auth(&self) {
        *self.auth.write() = None;
        self.controller.cookie_jar().clear();
        info!("Session cleared");
    }

    // === Marketplace reads ===

    /// Item document with its parsed listing time.
    #[instrument(skip(self))]
    pub async fn item_details(&self, token_id: &str) -> Result<ItemDetails, VenueError> {
        let started = Instant::now();
        let path = format!("{ITEMS_PATH}/{token_id}");
        let response = self
            .call_with_fallback(|| self.get_json("item_details", &path))
            .await?;

        let mut data: Value = response.json().map_err(|e| VenueError::Parse {
            operation: "item_details",
            reason: e.to_string(),
        })?;
        let created_at_ts = data
            .pointer("/salesInfo/createdAt")
            .and_then(Value::as_str)
            .and_then(parse_created_at)
            .ok_or_else(|| VenueError::Parse {
                operation: "item_details",
                reason: "missing or malformed salesInfo.createdAt".to_string(),
            })?;
        if let Some(object) = data.as_object_mut() {
            object.insert("createdAtTs".to_string(), Value::from(created_at_ts));
        }

        metrics::record_venue_latency(started, "item_details");
        debug!(created_at_ts, "Item details fetched");
        Ok(ItemDetails {
            token_id: token_id.to_string(),
            created_at_ts,
            data,
        })
    }

    /// Current listings matching `filter`.
    #[instrument(skip(self, filter))]
    pub async fn explore_items(
        &self,
        filter: Value,
        sorting: &str,
    ) -> Result<Vec<ListedItem>, VenueError> {
        let started = Instant::now();
        let body = json!({
            "filter": filter,
            "sorting": sorting,
            "walletAddr": self.address,
        });
        let response = self
            .call_with_fallback(|| self.post_json("explore_items", EXPLORE_PATH, &body, "/marketplace", false))
            .await?;

        let explore: ExploreResponse = response.json().map_err(|e| VenueError::Parse {
            operation: "explore_items",
            reason: e.to_string(),
        })?;

        let mut items = Vec::with_capacity(explore.items.len());
        for entry in explore.items {
            let Some(created_at_ts) = parse_created_at(&entry.sales_info.created_at) else {
                warn!(item = %entry.data.item_id, created_at = %entry.sales_info.created_at, "Skipping item with malformed listing time");
                continue;
            };
            items.push(ListedItem {
                id: entry.data.item_id,
                name: entry.name,
                token_id: entry.sales_info.token_id,
                price_wei: entry.sales_info.price_wei,
                minimum_price_wei: entry.sales_info.minimum_price_wei,
                last_traded_price_wei: entry.sales_info.last_traded_price_wei,
                created_at: entry.sales_info.created_at,
                created_at_ts,
            });
        }

        metrics::record_venue_latency(started, "explore_items");
        Ok(items)
    }

    // === Orders ===

    /// Buy a listed item at `params.amount`.
    pub async fn place_buy_order(
        &self,
        params: &OrderParams,
        confirm_real_order: bool,
    ) -> Result<Value, VenueError> {
        self.guard_order(confirm_real_order)?;
        self.submit_order(params, OrderKind::Buy).await
    }

    /// Bid on an item.
    pub async fn place_offer(
        &self,
        params: &OrderParams,
        confirm_real_order: bool,
    ) -> Result<Value, VenueError> {
        self.guard_order(confirm_real_order)?;
        self.submit_order(params, OrderKind::Offer).await
    }

    /// List an owned item.
    pub async fn place_sell_order(
        &self,
        params: &OrderParams,
        confirm_real_order: bool,
    ) -> Result<Value, VenueError> {
        self.guard_order(confirm_real_order)?;
        self.submit_order(params, OrderKind::Sell).await
    }

    /// Race `tasks` staggered buy attempts once the listing cooldown of an
    /// item listed at `created_at_ts` (unix seconds) has passed.
    ///
    /// The first successful attempt wins and the rest are dropped. If every
    /// attempt fails, the last error is returned.
    #[instrument(skip(self, params), fields(token_id = %params.nft_token_id))]
    pub async fn place_market_order_burst(
        &self,
        params: &OrderParams,
        created_at_ts: i64,
        tasks: usize,
        confirm_real_order: bool,
    ) -> Result<Value, VenueError> {
        self.guard_order(confirm_real_order)?;
        if tasks == 0 {
            return Err(VenueError::InvalidOrder("burst needs at least one attempt".to_string()));
        }

        let opens_at_ms = created_at_ts
            .saturating_mul(1000)
            .saturating_add(i64::try_from(self.settings.listing_cooldown.as_millis()).unwrap_or(i64::MAX));
        let wait_ms = opens_at_ms - Utc::now().timestamp_millis();
        if wait_ms > 0 {
            info!(wait_ms, "Waiting for listing cooldown");
            tokio::time::sleep(Duration::from_millis(wait_ms as u64)).await;
        }

        let delays = burst_delays(self.settings.concurrent_interval, tasks)?;
        info!(tasks, interval_ms = self.settings.concurrent_interval.as_millis() as u64, "Starting purchase burst");
        let mut attempts: FuturesUnordered<_> = delays
            .into_iter()
            .map(|delay| self.burst_attempt(params, delay))
            .collect();

        let mut last_error = None;
        while let Some(result) = attempts.next().await {
            match result {
                Ok(receipt) => {
                    info!("Purchase burst succeeded");
                    return Ok(receipt);
                }
                Err(e) => last_error = Some(e),
            }
        }

        let err = last_error.unwrap_or_else(|| VenueError::InvalidOrder("no attempts ran".to_string()));
        error!(error = %err, "Every purchase attempt failed");
        Err(err)
    }

    async fn burst_attempt(&self, params: &OrderParams, delay: Duration) -> Result<Value, VenueError> {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.submit_order(params, OrderKind::Buy).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                debug!(delay_ms = delay.as_millis() as u64, error = %e, "Purchase attempt failed");
                if !self.settings.failure_backoff.is_zero() {
                    tokio::time::sleep(self.settings.failure_backoff).await;
                }
                Err(e)
            }
        }
    }

    fn guard_order(&self, confirm_real_order: bool) -> Result<(), VenueError> {
        if self.settings.require_confirmation && !confirm_real_order {
            return Err(VenueError::ConfirmationRequired);
        }
        if !self.is_authenticated() {
            return Err(VenueError::Unauthenticated);
        }
        Ok(())
    }

    async fn submit_order(&self, params: &OrderParams, kind: OrderKind) -> Result<Value, VenueError> {
        let started = Instant::now();
        let order = build_order(&self.address, params, kind, Utc::now())?;
        let order_sign = signing::sign_order(&self.signer, &order).await?;
        let submission = OrderSubmission { order, order_sign };
        let path = format!("{ITEMS_PATH}/{}/{kind}", params.nft_token_id.trim());

        metrics::inc_orders_submitted();
        let result = self
            .call_with_fallback(|| self.send_order(kind, &path, &submission))
            .await;
        metrics::record_venue_latency(started, kind.operation());

        match result {
            Ok(receipt) => {
                info!(kind = kind.operation(), token_id = %params.nft_token_id, "Order accepted");
                Ok(receipt)
            }
            Err(e) => {
                metrics::inc_orders_failed();
                Err(e)
            }
        }
    }

    async fn send_order(
        &self,
        kind: OrderKind,
        path: &str,
        submission: &OrderSubmission,
    ) -> Result<Value, VenueError> {
        let operation = kind.operation();
        let body = serde_json::to_string(submission).map_err(|e| VenueError::Parse {
            operation,
            reason: e.to_string(),
        })?;
        let response = self
            .controller
            .post(&self.url(path), body, self.options("/marketplace", false))
            .await?;

        let parsed: Option<Value> = response.json().ok();
        if kind == OrderKind::Buy {
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("message"))
                .and_then(Value::as_str);
            if message == Some(NOT_READY_FOR_SALE) {
                return Err(VenueError::NotForSale {
                    token_id: submission.order.nft_token_id.clone(),
                    message: NOT_READY_FOR_SALE.to_string(),
                });
            }
        }

        let response = check_status(operation, response)?;
        Ok(parsed.unwrap_or(Value::String(response.body)))
    }

    // === Strategy ===

    /// Switch transport strategy, keeping the session.
    pub async fn switch_strategy(
        &self,
        variant: TransportVariant,
        options: Option<VariantOptions>,
    ) -> Result<(), VenueError> {
        self.controller.switch(variant, options).await?;
        Ok(())
    }

    /// Controller diagnostics.
    pub fn strategy_info(&self) -> ControllerDescription {
        self.controller.describe()
    }

    // === Plumbing ===

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn options(&self, referer_path: &str, with_address: bool) -> RequestOptions {
        let mut options = RequestOptions::default()
            .header("origin", self.base_url.clone())
            .header("referer", format!("{}{referer_path}", self.base_url));
        if with_address {
            options = options.header("x-msu-address", self.address.clone());
        }
        options
    }

    async fn get_json(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<ResponseEnvelope, VenueError> {
        let response = self
            .controller
            .get(&self.url(path), self.options("/marketplace", false))
            .await?;
        check_status(operation, response)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        path: &str,
        body: &T,
        referer_path: &str,
        with_address: bool,
    ) -> Result<ResponseEnvelope, VenueError> {
        let body = serde_json::to_string(body).map_err(|e| VenueError::Parse {
            operation,
            reason: e.to_string(),
        })?;
        let response = self
            .controller
            .post(&self.url(path), body, self.options(referer_path, with_address))
            .await?;
        check_status(operation, response)
    }

    /// Run `call`; on a challenge, switch to the fallback variant and run it
    /// once more.
    async fn call_with_fallback<T, F, Fut>(&self, call: F) -> Result<T, VenueError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, VenueError>>,
    {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some((variant, options)) = self.fallback.on_challenge.clone() else {
            return Err(err);
        };
        let is_challenge = err.transport().is_some_and(TransportError::suggests_switch);
        if !is_challenge || self.controller.describe().variant == Some(variant) {
            return Err(err);
        }

        warn!(error = %err, to = %variant, "Challenge detected, switching strategy and retrying");
        match self.controller.switch(variant, options).await {
            Ok(()) => {}
            // Another caller is already switching; wait for it by retrying
            // through the queued slot.
            Err(TransportError::SwitchInProgress) => {}
            Err(e) => return Err(e.into()),
        }
        call().await
    }
}

fn check_status(
    operation: &'static str,
    response: ResponseEnvelope,
) -> Result<ResponseEnvelope, VenueError> {
    match response.status {
        200..=299 => Ok(response),
        429 => Err(VenueError::RateLimited { operation }),
        403 => Err(VenueError::Blocked { operation }),
        status => {
            let mut body = response.body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            Err(VenueError::UnexpectedStatus {
                operation,
                status,
                body,
            })
        }
    }
}

/// Start offsets for `tasks` attempts spaced `interval` apart.
fn burst_delays(interval: Duration, tasks: usize) -> Result<Vec<Duration>, VenueError> {
    let last = u32::try_from(tasks.saturating_sub(1))
        .ok()
        .filter(|last| interval.checked_mul(*last).is_some())
        .ok_or_else(|| {
            VenueError::InvalidOrder(format!(
                "burst of {tasks} attempts spaced {interval:?} apart is too long"
            ))
        })?;
    Ok((0..=last).take(tasks).map(|i| interval * i).collect())
}
