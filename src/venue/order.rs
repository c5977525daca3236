//! Order assembly.

use std::str::FromStr;

use alloy::primitives::U256;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::{OrderKind, OrderParams, OrderPayload, TokenAmount};
use crate::error::VenueError;

/// Payment token contract.
pub const TOKEN_ADDRESS: &str = "0x07E49Ad54FcD23F6e7B911C2068F0148d1827c08";

/// NFT contract.
pub const NFT_ADDRESS: &str = "0x43DCff2A0cedcd5e10e6f1c18b503498dDCe60d5";

/// Upper bound on a unit-denominated price; larger values are almost
/// certainly wei passed as units.
pub const MAX_UNITS: Decimal = dec!(1000000000);

const WEI_PER_UNIT: Decimal = dec!(1000000000000000000);

const SECONDS_PER_DAY: i64 = 86_400;

/// Timestamp format of `salesInfo.createdAt`.
const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Convert a price to wei.
pub fn to_wei(amount: TokenAmount) -> Result<U256, VenueError> {
    match amount {
        TokenAmount::Wei(wei) => Ok(wei),
        TokenAmount::Units(units) => {
            if units.is_sign_negative() && !units.is_zero() {
                return Err(VenueError::InvalidOrder(format!(
                    "token amount must not be negative: {units}"
                )));
            }
            if units > MAX_UNITS {
                return Err(VenueError::InvalidOrder(format!(
                    "token amount {units} exceeds {MAX_UNITS}, probably wei passed as units"
                )));
            }
            let wei = (units * WEI_PER_UNIT).trunc();
            U256::from_str(&wei.normalize().to_string())
                .map_err(|e| VenueError::InvalidOrder(format!("token amount {units}: {e}")))
        }
    }
}

/// Build an unsigned order for `maker` at time `now`.
pub fn build_order(
    maker: &str,
    params: &OrderParams,
    kind: OrderKind,
    now: DateTime<Utc>,
) -> Result<OrderPayload, VenueError> {
    if params.nft_token_id.trim().is_empty() {
        return Err(VenueError::InvalidOrder("nft_token_id is required".to_string()));
    }
    let token_amount = to_wei(params.amount)?;
    let listing_time = now.timestamp();

    Ok(OrderPayload {
        is_seller: kind.is_seller(),
        maker: maker.to_string(),
        listing_time: listing_time.to_string(),
        expiration_time: (listing_time + kind.expire_days() * SECONDS_PER_DAY).to_string(),
        token_address: TOKEN_ADDRESS.to_string(),
        token_amount: token_amount.to_string(),
        nft_address: NFT_ADDRESS.to_string(),
        nft_token_id: params.nft_token_id.trim().to_string(),
        salt: now.timestamp_millis().to_string(),
    })
}

/// Parse a `salesInfo.createdAt` timestamp into unix seconds.
pub fn parse_created_at(created_at: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(created_at, CREATED_AT_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}
