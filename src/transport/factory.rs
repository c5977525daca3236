//! Transport construction from configuration.

use std::sync::Arc;

use tracing::debug;

use super::browser::BrowserTransport;
use super::fingerprint::FingerprintTransport;
use super::types::{TransportConfig, TransportVariant};
use super::Transport;
use crate::error::TransportError;

/// Builds transports. Construction only: the caller runs `init`.
pub trait TransportFactory: Send + Sync {
    /// Build an uninitialized transport for `config.variant`.
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Factory for the built-in variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        config.validate()?;
        debug!(variant = %config.variant, timeout_ms = config.timeout_ms(), "Building transport");
        let transport: Arc<dyn Transport> = match config.variant {
            TransportVariant::Fingerprint => Arc::new(FingerprintTransport::new(config.clone())?),
            TransportVariant::Browser => Arc::new(BrowserTransport::new(config.clone())?),
        };
        Ok(transport)
    }
}
