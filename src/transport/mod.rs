//! Pluggable request transports.
//!
//! This module handles:
//! - The [`Transport`] capability trait shared by every back-end
//! - Fingerprint-profile HTTPS transport (reqwest)
//! - Browser transport driving Chromium over the DevTools protocol
//! - Challenge-page classification
//! - Transport construction from configuration
//! - Scripted mock transport for testing

pub mod browser;
pub mod challenge;
pub mod factory;
pub mod fingerprint;
pub mod mock;
pub mod profile;
pub mod types;

use async_trait::async_trait;

use crate::error::TransportError;

pub use browser::{BrowserEngine, BrowserOptions, BrowserTransport, CdpEngine, ProxyCredentials};
pub use factory::{DefaultTransportFactory, TransportFactory};
pub use fingerprint::{FingerprintOptions, FingerprintTransport};
pub use mock::{MockFailure, MockTransport, MockTransportFactory};
pub use profile::BrowserProfile;
pub use types::{
    Method, RequestSpec, ResponseEnvelope, TransportConfig, TransportVariant, VariantOptions,
};

/// Uniform capability every transport variant provides.
///
/// A transport is built by a [`TransportFactory`], started with `init`, used
/// through `request`, and released with `destroy` on every exit path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which variant this is.
    fn variant(&self) -> TransportVariant;

    /// Start the underlying engine.
    async fn init(&self) -> Result<(), TransportError>;

    /// Perform one request.
    async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportError>;

    /// Cookies held natively by the engine (browser cookie store).
    async fn session_cookies(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Release engine resources. Idempotent, never fails.
    async fn destroy(&self);
}

/// Merge `overrides` into `base`: replace same-named (case-insensitive) headers
/// in place, append new ones.
pub(crate) fn merge_headers(base: &mut Vec<(String, String)>, overrides: &[(String, String)]) {
    for (name, value) in overrides {
        match base
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value.clone(),
            None => base.push((name.clone(), value.clone())),
        }
    }
}
