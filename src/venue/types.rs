//! Marketplace wire and domain types.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::Display;

/// Order as submitted to the venue. Numbers travel as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    /// Listing (sell) or bid (buy/offer).
    pub is_seller: bool,
    /// Wallet placing the order (checksummed).
    pub maker: String,
    /// Unix seconds.
    pub listing_time: String,
    /// Unix seconds.
    pub expiration_time: String,
    /// Payment token contract.
    pub token_address: String,
    /// Price in wei.
    pub token_amount: String,
    /// NFT contract.
    pub nft_address: String,
    /// NFT token ID.
    pub nft_token_id: String,
    /// Unix millis at creation.
    pub salt: String,
}

/// Signed order request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    /// The order.
    pub order: OrderPayload,
    /// `0x` hex EIP-712 signature.
    pub order_sign: String,
}

/// Price of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAmount {
    /// Whole-token units, converted to wei.
    Units(Decimal),
    /// Already in wei.
    Wei(U256),
}

/// What to trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderParams {
    /// NFT token ID.
    pub nft_token_id: String,
    /// Price.
    pub amount: TokenAmount,
}

impl OrderParams {
    /// Params priced in token units.
    pub fn units(nft_token_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            nft_token_id: nft_token_id.into(),
            amount: TokenAmount::Units(amount),
        }
    }

    /// Params priced in wei.
    pub fn wei(nft_token_id: impl Into<String>, amount: U256) -> Self {
        Self {
            nft_token_id: nft_token_id.into(),
            amount: TokenAmount::Wei(amount),
        }
    }
}

/// Order endpoint family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OrderKind {
    /// Buy a listed item at its price.
    Buy,
    /// Bid on an item.
    Offer,
    /// List an owned item.
    #[strum(to_string = "register")]
    Sell,
}

impl OrderKind {
    /// Days until the order expires.
    pub fn expire_days(self) -> i64 {
        match self {
            OrderKind::Buy | OrderKind::Offer => 3,
            OrderKind::Sell => 14,
        }
    }

    /// Whether the maker is selling.
    pub fn is_seller(self) -> bool {
        matches!(self, OrderKind::Sell)
    }

    /// Metric/log label.
    pub fn operation(self) -> &'static str {
        match self {
            OrderKind::Buy => "buy",
            OrderKind::Offer => "offer",
            OrderKind::Sell => "sell",
        }
    }
}

/// Session tokens issued at wallet sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    /// Access token.
    pub wat: String,
    /// Refresh token.
    pub wrt: String,
    /// Access token expiry as sent by the venue.
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub wat_expire_at: Option<String>,
    /// Refresh token expiry as sent by the venue.
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub wrt_expire_at: Option<String>,
}

/// Item detail document with its parsed listing time.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDetails {
    /// NFT token ID.
    pub token_id: String,
    /// `salesInfo.createdAt` as unix seconds.
    pub created_at_ts: i64,
    /// Full venue document, `createdAtTs` included.
    pub data: Value,
}

/// One row of the explore listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedItem {
    /// Catalog item ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// NFT token ID.
    pub token_id: String,
    /// Asking price in wei.
    pub price_wei: Option<String>,
    /// Minimum accepted price in wei.
    pub minimum_price_wei: Option<String>,
    /// Last traded price in wei.
    pub last_traded_price_wei: Option<String>,
    /// Listing time as sent.
    pub created_at: String,
    /// Listing time as unix seconds.
    pub created_at_ts: i64,
}

/// Default explore sorting.
pub const RECENTLY_LISTED: &str = "ExploreSorting_RECENTLY_LISTED";

#[derive(Debug, Deserialize)]
pub(crate) struct ExploreResponse {
    #[serde(default)]
    pub items: Vec<ExploreEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExploreEntry {
    pub name: String,
    pub data: ExploreEntryData,
    pub sales_info: SalesInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExploreEntryData {
    #[serde(deserialize_with = "string_or_number")]
    pub item_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SalesInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub token_id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub price_wei: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub minimum_price_wei: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub last_traded_price_wei: Option<String>,
    pub created_at: String,
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    value_to_string(Value::deserialize(deserializer)?)
        .ok_or_else(|| serde::de::Error::custom("expected string or number"))
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(value_to_string))
}
