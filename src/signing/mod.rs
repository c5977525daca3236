//! Signing utilities for the marketplace.
//!
//! This module provides utilities for:
//! - Creating signers from private keys
//! - Computing wallet addresses
//! - Signing the wallet login challenge (EIP-191 personal message)
//! - Signing orders as EIP-712 typed data

use std::str::FromStr;

use alloy::primitives::{address, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol;
use alloy::sol_types::{eip712_domain, Eip712Domain, SolStruct};
use tracing::debug;

use crate::error::VenueError;
use crate::metrics;
use crate::venue::OrderPayload;

/// Marketplace settlement contract.
pub const VERIFYING_CONTRACT: Address = address!("f1c82c082af3de3614771105f01dc419c3163352");

/// Chain the marketplace contract lives on.
pub const CHAIN_ID: u64 = 68414;

sol! {
    /// Typed order as the marketplace contract hashes it.
    #[derive(Debug, PartialEq, Eq)]
    struct Order {
        uint256 isSeller;
        address maker;
        uint256 listingTime;
        uint256 expirationTime;
        address tokenAddress;
        uint256 tokenAmount;
        address nftAddress;
        uint256 nftTokenId;
        uint256 salt;
    }
}

/// EIP-712 domain of the marketplace.
pub fn marketplace_domain() -> Eip712Domain {
    eip712_domain! {
        name: "Marketplace",
        version: "1.0",
        chain_id: CHAIN_ID,
        verifying_contract: VERIFYING_CONTRACT,
    }
}

/// Create a LocalSigner from a hex-encoded private key.
///
/// The private key can be with or without the "0x" prefix.
pub fn create_signer(private_key: &str) -> Result<PrivateKeySigner, VenueError> {
    let key = private_key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);
    let bytes = hex::decode(key)
        .map_err(|e| VenueError::Signing(format!("Invalid private key hex: {}", e)))?;

    if bytes.len() != 32 {
        return Err(VenueError::Signing(format!(
            "Private key must be 32 bytes, got {}",
            bytes.len()
        )));
    }

    let key_bytes = B256::from_slice(&bytes);
    PrivateKeySigner::from_bytes(&key_bytes)
        .map_err(|e| VenueError::Signing(format!("Failed to create signer: {}", e)))
}

/// Checksummed wallet address for a private key.
pub fn address_from_private_key(private_key: &str) -> Result<String, VenueError> {
    let signer = create_signer(private_key)?;
    Ok(signer.address().to_checksum(None))
}

/// Sign the login challenge text as a personal message. Returns `0x` hex.
pub async fn sign_login_message(
    signer: &PrivateKeySigner,
    message: &str,
) -> Result<String, VenueError> {
    let _timer = metrics::timer_signing();
    let signature = signer
        .sign_message(message.as_bytes())
        .await
        .map_err(|e| VenueError::Signing(format!("Failed to sign login message: {}", e)))?;
    Ok(format!("0x{}", hex::encode(signature.as_bytes())))
}

fn parse_u256(field: &str, value: &str) -> Result<U256, VenueError> {
    U256::from_str(value.trim())
        .map_err(|e| VenueError::InvalidOrder(format!("{field} {value:?} is not an integer: {e}")))
}

fn parse_address(field: &str, value: &str) -> Result<Address, VenueError> {
    Address::from_str(&value.trim().to_lowercase())
        .map_err(|e| VenueError::InvalidOrder(format!("{field} {value:?} is not an address: {e}")))
}

/// Typed struct the contract verifies for `payload`.
///
/// The contract recovers the maker from a digest with `isSeller = 0` for both
/// sides, so the flag is not part of what gets signed.
pub fn typed_order(payload: &OrderPayload) -> Result<Order, VenueError> {
    Ok(Order {
        isSeller: U256::ZERO,
        maker: parse_address("maker", &payload.maker)?,
        listingTime: parse_u256("listingTime", &payload.listing_time)?,
        expirationTime: parse_u256("expirationTime", &payload.expiration_time)?,
        tokenAddress: parse_address("tokenAddress", &payload.token_address)?,
        tokenAmount: parse_u256("tokenAmount", &payload.token_amount)?,
        nftAddress: parse_address("nftAddress", &payload.nft_address)?,
        nftTokenId: parse_u256("nftTokenId", &payload.nft_token_id)?,
        salt: parse_u256("salt", &payload.salt)?,
    })
}

/// EIP-712 digest of `payload` under the marketplace domain.
pub fn order_digest(payload: &OrderPayload) -> Result<B256, VenueError> {
    Ok(typed_order(payload)?.eip712_signing_hash(&marketplace_domain()))
}

/// Sign an order. Returns `0x` hex of the 65-byte signature.
pub async fn sign_order(
    signer: &PrivateKeySigner,
    payload: &OrderPayload,
) -> Result<String, VenueError> {
    let _timer = metrics::timer_signing();
    let digest = order_digest(payload)?;
    let signature = signer
        .sign_hash(&digest)
        .await
        .map_err(|e| VenueError::Signing(format!("Failed to sign order: {}", e)))?;
    debug!(token_id = %payload.nft_token_id, "Order signed");
    Ok(format!("0x{}", hex::encode(signature.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Signature;

    const KEY: &str = "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn payload(maker: &str) -> OrderPayload {
        OrderPayload {
            is_seller: false,
            maker: maker.to_string(),
            listing_time: "1700000000".to_string(),
            expiration_time: "1700259200".to_string(),
            token_address: "0x07E49Ad54FcD23F6e7B911C2068F0148d1827c08".to_string(),
            token_amount: "1500000000000000000".to_string(),
            nft_address: "0x43DCff2A0cedcd5e10e6f1c18b503498dDCe60d5".to_string(),
            nft_token_id: "123456".to_string(),
            salt: "1700000000123".to_string(),
        }
    }

    #[test]
    fn create_signer_accepts_both_prefixes() {
        assert!(create_signer(KEY).is_ok());
        assert!(create_signer(&KEY[2..]).is_ok());
    }

    #[test]
    fn create_signer_rejects_bad_keys() {
        assert!(create_signer("0xnot_valid_hex").is_err());
        assert!(create_signer("0x1234").is_err());
    }

    #[test]
    fn address_is_checksummed() {
        let address = address_from_private_key(KEY).unwrap();
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
        assert_ne!(address, address.to_lowercase());
    }

    #[tokio::test]
    async fn order_signature_recovers_to_maker() {
        let signer = create_signer(KEY).unwrap();
        let maker = signer.address().to_checksum(None);
        let order = payload(&maker);

        let signature = sign_order(&signer, &order).await.unwrap();
        let bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();
        assert_eq!(bytes.len(), 65);

        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        let recovered = signature
            .recover_address_from_prehash(&order_digest(&order).unwrap())
            .unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn seller_flag_does_not_change_digest() {
        let buy = payload("0x0000000000000000000000000000000000000001");
        let sell = OrderPayload {
            is_seller: true,
            ..buy.clone()
        };
        assert_eq!(order_digest(&buy).unwrap(), order_digest(&sell).unwrap());
    }

    #[test]
    fn address_case_does_not_change_digest() {
        let mixed = payload("0xAbCdEf0000000000000000000000000000000001");
        let lower = payload("0xabcdef0000000000000000000000000000000001");
        assert_eq!(order_digest(&mixed).unwrap(), order_digest(&lower).unwrap());
    }

    #[test]
    fn malformed_fields_are_invalid_orders() {
        let mut order = payload("0x0000000000000000000000000000000000000001");
        order.token_amount = "1.5".to_string();
        assert!(matches!(order_digest(&order), Err(VenueError::InvalidOrder(_))));
    }

    #[tokio::test]
    async fn login_signature_is_hex() {
        let signer = create_signer(KEY).unwrap();
        let signature = sign_login_message(&signer, "Sign in to MSU: nonce 42").await.unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 2 + 130);
    }
}
