//! Runtime transport strategy selection.
//!
//! [`StrategyController`] owns the long-lived [`CookieJar`] and at most one
//! active transport. State machine:
//!
//! ```text
//! UNINITIALIZED --init--> READY(v) --switch--> SWITCHING --> READY(v')
//!                            |                     |
//!                            +------destroy------> DESTROYED <-- (replacement failed to start)
//! ```
//!
//! Requests hold a read guard on the active slot for their whole duration.
//! A switch takes the write guard, so it waits for in-flight requests to
//! drain and new requests queue behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::error::TransportError;
use crate::metrics;
use crate::session::{CookieJar, RequestOptions, SessionedClient};
use crate::transport::{
    RequestSpec, ResponseEnvelope, Transport, TransportConfig, TransportFactory, TransportVariant,
    VariantOptions,
};

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "variant", rename_all = "snake_case")]
pub enum ControllerState {
    /// `init` not called yet.
    Uninitialized,
    /// Serving requests over the given variant.
    Ready(TransportVariant),
    /// Replacing the active transport.
    Switching {
        /// Variant being replaced.
        from: TransportVariant,
        /// Variant being started.
        to: TransportVariant,
    },
    /// Shut down; unusable.
    Destroyed,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Uninitialized => write!(f, "uninitialized"),
            ControllerState::Ready(variant) => write!(f, "ready({variant})"),
            ControllerState::Switching { from, to } => write!(f, "switching({from} -> {to})"),
            ControllerState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerDescription {
    /// Active variant, if any.
    pub variant: Option<TransportVariant>,
    /// Lifecycle state.
    pub state: ControllerState,
    /// Whether requests are accepted.
    pub is_ready: bool,
    /// Stored cookie names (aliases included).
    pub cookie_count: usize,
    /// Upstream proxies configured on the active transport.
    pub proxy_count: usize,
    /// Whether requests are routed through a proxy.
    pub uses_proxy: bool,
}

struct Active {
    client: Arc<SessionedClient>,
    config: TransportConfig,
}

/// Owns the cookie jar and the active transport; swaps transports at runtime
/// without losing session cookies.
pub struct StrategyController {
    factory: Arc<dyn TransportFactory>,
    jar: Arc<CookieJar>,
    phase: Mutex<ControllerState>,
    slot: RwLock<Option<Active>>,
    proxy_count: AtomicUsize,
    base_url: Option<url::Url>,
}

impl StrategyController {
    /// Controller with an empty jar.
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_jar(factory, Arc::new(CookieJar::new()))
    }

    /// Controller around an existing jar (e.g. restored cookies).
    pub fn with_jar(factory: Arc<dyn TransportFactory>, jar: Arc<CookieJar>) -> Self {
        Self {
            factory,
            jar,
            phase: Mutex::new(ControllerState::Uninitialized),
            slot: RwLock::new(None),
            proxy_count: AtomicUsize::new(0),
            base_url: None,
        }
    }

    /// Resolve relative request paths (`/price/123`) against `base_url`.
    pub fn with_base_url(mut self, base_url: url::Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Current state.
    pub fn state(&self) -> ControllerState {
        *self.phase.lock()
    }

    /// Whether requests are accepted.
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), ControllerState::Ready(_))
    }

    /// Diagnostics snapshot.
    pub fn describe(&self) -> ControllerDescription {
        let state = self.state();
        let variant = match state {
            ControllerState::Ready(variant) => Some(variant),
            ControllerState::Switching { from, .. } => Some(from),
            _ => None,
        };
        let proxy_count = match variant {
            Some(_) => self.proxy_count.load(Ordering::Acquire),
            None => 0,
        };
        ControllerDescription {
            variant,
            state,
            is_ready: matches!(state, ControllerState::Ready(_)),
            cookie_count: self.jar.len(),
            proxy_count,
            uses_proxy: proxy_count > 0,
        }
    }

    /// Shared jar.
    pub fn cookie_jar(&self) -> Arc<CookieJar> {
        self.jar.clone()
    }

    /// Snapshot of session cookies.
    pub fn cookies(&self) -> HashMap<String, String> {
        self.jar.get_all()
    }

    /// Seed the jar, e.g. from a persisted session.
    pub fn import_cookies<I, K, V>(&self, cookies: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.jar.set_all(cookies);
    }

    /// Build and start the first transport.
    ///
    /// On failure the built transport is destroyed and the controller stays
    /// uninitialized.
    #[instrument(skip(self, config), fields(variant = %config.variant))]
    pub async fn init(&self, config: TransportConfig) -> Result<(), TransportError> {
        let mut slot = self.slot.write().await;
        let state = self.state();
        if state != ControllerState::Uninitialized {
            return Err(TransportError::AlreadyInitialized(state.to_string()));
        }

        let transport = self.factory.create(&config)?;
        if let Err(e) = transport.init().await {
            transport.destroy().await;
            warn!(error = %e, "Transport failed to start");
            return Err(e);
        }

        let variant = transport.variant();
        self.proxy_count.store(config.proxy_count(), Ordering::Release);
        *slot = Some(Active {
            client: Arc::new(SessionedClient::new(transport, self.jar.clone())),
            config,
        });
        *self.phase.lock() = ControllerState::Ready(variant);
        info!(%variant, "Strategy controller ready");
        Ok(())
    }

    /// Replace the active transport with `variant`.
    ///
    /// Timeout and default headers carry over from the current config;
    /// `options` replaces the variant options. The cookie jar is kept and
    /// seeded with the outgoing transport's native cookies.
    ///
    /// If the replacement cannot be built the old transport stays active. If
    /// it is built but fails to start after the old one was torn down, the
    /// controller is destroyed and [`TransportError::SwitchFailed`] returned.
    #[instrument(skip(self, options))]
    pub async fn switch(
        &self,
        variant: TransportVariant,
        options: Option<VariantOptions>,
    ) -> Result<(), TransportError> {
        let from = {
            let mut phase = self.phase.lock();
            match *phase {
                ControllerState::Ready(from) => {
                    *phase = ControllerState::Switching { from, to: variant };
                    from
                }
                ControllerState::Switching { .. } => return Err(TransportError::SwitchInProgress),
                other => return Err(TransportError::NotReady(other.to_string())),
            }
        };
        let started = Instant::now();
        info!(%from, to = %variant, "Switching transport strategy");

        let mut slot = self.slot.write().await;

        let Some(old) = slot.take() else {
            // Destroyed while waiting for in-flight requests.
            return Err(TransportError::NotReady(self.state().to_string()));
        };

        let config = old.config.switched_to(variant, options);
        let replacement = match self.factory.create(&config) {
            Ok(transport) => transport,
            Err(e) => {
                *slot = Some(old);
                self.restore_phase(ControllerState::Ready(from));
                metrics::record_switch(variant, false, started);
                warn!(error = %e, "Replacement transport could not be built");
                return Err(e);
            }
        };

        let outgoing = old.client.transport().clone();
        let native = outgoing.session_cookies().await;
        if !native.is_empty() {
            self.jar.set_all(native);
        }
        outgoing.destroy().await;
        drop(old);

        if let Err(e) = replacement.init().await {
            replacement.destroy().await;
            *self.phase.lock() = ControllerState::Destroyed;
            metrics::record_switch(variant, false, started);
            error!(error = %e, to = %variant, "Replacement transport failed to start, controller destroyed");
            return Err(TransportError::SwitchFailed {
                to: variant,
                source: Box::new(e),
            });
        }

        self.proxy_count.store(config.proxy_count(), Ordering::Release);
        *slot = Some(Active {
            client: Arc::new(SessionedClient::new(replacement, self.jar.clone())),
            config,
        });
        self.restore_phase(ControllerState::Ready(variant));
        metrics::record_switch(variant, true, started);
        info!(
            to = %variant,
            elapsed_ms = started.elapsed().as_millis() as u64,
            cookies = self.jar.len(),
            "Transport strategy switched"
        );
        Ok(())
    }

    /// Leave `Switching` unless a concurrent `destroy` already won.
    fn restore_phase(&self, next: ControllerState) {
        let mut phase = self.phase.lock();
        if matches!(*phase, ControllerState::Switching { .. }) {
            *phase = next;
        }
    }

    /// Release the transport and clear the jar. Idempotent, never fails.
    pub async fn destroy(&self) {
        *self.phase.lock() = ControllerState::Destroyed;
        let active = self.slot.write().await.take();
        if let Some(active) = active {
            active.client.transport().destroy().await;
            info!(variant = %active.client.variant(), "Strategy controller destroyed");
        }
        self.jar.clear();
    }

    /// GET `url` through the active transport.
    pub async fn get(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.request(RequestSpec::get(url), options).await
    }

    /// POST a serialized JSON body through the active transport.
    pub async fn post(
        &self,
        url: &str,
        body: impl Into<String>,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.request(RequestSpec::post(url, body), options).await
    }

    /// Send `spec` through the active transport.
    pub async fn request(
        &self,
        mut spec: RequestSpec,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, TransportError> {
        let slot = self.slot.read().await;
        let Some(active) = slot.as_ref() else {
            return Err(TransportError::NotReady(self.state().to_string()));
        };
        spec.url = self.resolve(&spec.url)?;
        active.client.send(spec, options).await
    }

    fn resolve(&self, url: &str) -> Result<String, TransportError> {
        match (&self.base_url, url.starts_with('/')) {
            (Some(base), true) => base
                .join(url)
                .map(String::from)
                .map_err(|e| TransportError::InvalidConfig(format!("cannot resolve {url}: {e}"))),
            _ => Ok(url.to_string()),
        }
    }

    /// Active transport, for callers that need direct access.
    pub async fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|active| active.client.transport().clone())
    }
}
