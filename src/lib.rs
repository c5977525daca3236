//! MSU marketplace trading client.
//!
//! Requests to the venue go through a switchable transport strategy: a
//! direct HTTPS client that imitates a browser fingerprint, or a real
//! browser driven over the DevTools protocol. The session (cookies and
//! wallet tokens) lives above the transport, so switching strategy at
//! runtime keeps the user logged in.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`transport`]: Transport trait, fingerprint and browser back-ends, factory
//! - [`session`]: Cookie jar and the sessioned client
//! - [`controller`]: Strategy controller (init, switch, destroy)
//! - [`venue`]: Marketplace login, listings and orders
//! - [`signing`]: Wallet and EIP-712 order signing
//! - [`metrics`]: Counters and latency histograms
//! - [`logging`]: Tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> msu_trader::Result<()> {
//! let config = msu_trader::Config::load()?;
//! let client = msu_trader::connect(&config).await?;
//! client.login().await?;
//! println!("{:?}", client.strategy_info());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod signing;
pub mod transport;
pub mod venue;

use std::sync::Arc;

use tracing::info;

pub use config::Config;
pub use controller::{ControllerDescription, ControllerState, StrategyController};
pub use error::{ClientError, Result, TransportError, VenueError};
pub use session::{CookieJar, SessionedClient};
pub use transport::{Transport, TransportConfig, TransportVariant};
pub use venue::VenueClient;

/// Build an initialized controller and venue client from `config`.
pub async fn connect(config: &Config) -> Result<VenueClient> {
    config.validate().map_err(ClientError::InvalidConfig)?;
    metrics::init_metrics();

    let base_url = url::Url::parse(&config.venue_base_url)
        .map_err(|e| ClientError::InvalidConfig(format!("VENUE_BASE_URL: {e}")))?;
    let signer = signing::create_signer(&config.private_key)?;

    let controller = Arc::new(
        StrategyController::new(Arc::new(transport::DefaultTransportFactory))
            .with_base_url(base_url),
    );
    controller.init(config.transport_config()?).await?;

    let client = VenueClient::new(controller, signer, config.venue_base_url.clone())
        .with_fallback(config.fallback_policy()?)
        .with_settings(config.venue_settings());
    info!(address = client.address(), strategy = %config.request_strategy, "Venue client ready");
    Ok(client)
}
