//! MSU marketplace: wallet login, listings and signed orders.

pub mod client;
pub mod order;
pub mod types;

pub use client::{FallbackPolicy, VenueClient, VenueSettings, NOT_READY_FOR_SALE};
pub use order::{build_order, parse_created_at, to_wei, NFT_ADDRESS, TOKEN_ADDRESS};
pub use types::{
    AuthTokens, ItemDetails, ListedItem, OrderKind, OrderParams, OrderPayload, OrderSubmission,
    TokenAmount, RECENTLY_LISTED,
};
