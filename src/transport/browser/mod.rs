//! Browser transport: requests executed by a real Chromium instance.
//!
//! GET becomes a page navigation and POST an in-page `fetch`, so the anti-bot
//! layer sees traffic from a live JavaScript context. The browser's cookie
//! store is authoritative while this transport is active; every response
//! carries the cookies the operation added or changed in it as `name=value`
//! set-cookie entries.

mod cdp;
mod engine;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::challenge;
use super::types::{Method, RequestSpec, ResponseEnvelope, TransportConfig, TransportVariant, VariantOptions};
use super::{merge_headers, Transport};
use crate::error::TransportError;
use crate::metrics;
use crate::session::parse_set_cookie;

pub use cdp::CdpEngine;
pub use engine::{BrowserEngine, PageRequest, PageResponse};

/// How often the page is re-read while waiting for a challenge to clear.
const CHALLENGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upstream proxy login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Launch options for [`BrowserTransport`].
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Run without a window.
    pub headless: bool,
    /// Extra command-line arguments.
    pub args: Vec<String>,
    /// Browser executable; discovered on PATH when `None`.
    pub executable: Option<String>,
    /// Upstream proxy server (`host:port` or URL).
    pub proxy_server: Option<String>,
    /// Credentials for `proxy_server`.
    pub proxy_credentials: Option<ProxyCredentials>,
    /// Wait for interactive challenges to clear instead of failing.
    pub auto_solve_challenge: bool,
    /// How long to wait for a challenge to clear.
    pub challenge_timeout: Duration,
    /// Remote debugging port; a free one is picked when `None`.
    pub debugging_port: Option<u16>,
    /// User-Agent override.
    pub user_agent: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            args: Vec::new(),
            executable: None,
            proxy_server: None,
            proxy_credentials: None,
            auto_solve_challenge: true,
            challenge_timeout: Duration::from_secs(15),
            debugging_port: None,
            user_agent: None,
        }
    }
}

impl BrowserOptions {
    /// Headless or headed defaults.
    pub fn headless(headless: bool) -> Self {
        Self {
            headless,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.proxy_credentials.is_some() && self.proxy_server.is_none() {
            return Err(TransportError::InvalidConfig(
                "proxy credentials given without a proxy server".to_string(),
            ));
        }
        if let Some(creds) = &self.proxy_credentials {
            if creds.username.is_empty() {
                return Err(TransportError::InvalidConfig(
                    "proxy username must not be empty".to_string(),
                ));
            }
        }
        if self.auto_solve_challenge && self.challenge_timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "challenge timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Transport backed by a [`BrowserEngine`].
///
/// Operations against the engine are serialized through one lock. A caller
/// that drops its future does not release the lock early: the operation runs
/// to completion in its own task and releases the lock when the engine call
/// returns.
pub struct BrowserTransport {
    config: TransportConfig,
    options: BrowserOptions,
    engine: Arc<dyn BrowserEngine>,
    op_lock: Arc<Mutex<()>>,
    started: AtomicBool,
}

impl BrowserTransport {
    /// Build a transport that drives Chromium over the DevTools protocol.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        Self::with_engine(config, Arc::new(CdpEngine::new()))
    }

    /// Build a transport around a specific engine.
    pub fn with_engine(
        config: TransportConfig,
        engine: Arc<dyn BrowserEngine>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let options = match &config.variant_options {
            Some(VariantOptions::Browser(options)) => options.clone(),
            Some(other) => {
                return Err(TransportError::InvalidConfig(format!(
                    "{} options supplied for browser transport",
                    other.variant()
                )))
            }
            None => BrowserOptions::default(),
        };
        options.validate()?;

        Ok(Self {
            config,
            options,
            engine,
            op_lock: Arc::new(Mutex::new(())),
            started: AtomicBool::new(false),
        })
    }

    /// Launch options.
    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }
}

#[async_trait]
impl Transport for BrowserTransport {
    fn variant(&self) -> TransportVariant {
        TransportVariant::Browser
    }

    #[instrument(skip(self), fields(headless = self.options.headless))]
    async fn init(&self) -> Result<(), TransportError> {
        let _guard = self.op_lock.lock().await;
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        let started = Instant::now();
        self.engine.launch(&self.options).await?;
        self.started.store(true, Ordering::Release);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            proxy = self.options.proxy_server.is_some(),
            "Browser transport ready"
        );
        Ok(())
    }

    async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(TransportError::NotReady(
                "browser transport not initialized".to_string(),
            ));
        }

        let operation = BrowserOperation {
            engine: self.engine.clone(),
            timeout: self.config.timeout,
            auto_solve: self.options.auto_solve_challenge,
            challenge_timeout: self.options.challenge_timeout,
            default_headers: self.config.headers.clone(),
        };
        let lock = self.op_lock.clone();

        let handle = tokio::spawn(async move {
            let _guard = lock.lock_owned().await;
            operation.run(spec).await
        });

        handle
            .await
            .map_err(|e| TransportError::Network(format!("browser operation aborted: {e}")))?
    }

    async fn session_cookies(&self) -> Vec<(String, String)> {
        if !self.started.load(Ordering::Acquire) {
            return Vec::new();
        }
        let _guard = self.op_lock.lock().await;
        match self.engine.cookies(None).await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(error = %e, "Failed to read browser cookie store");
                Vec::new()
            }
        }
    }

    async fn destroy(&self) {
        let _guard = self.op_lock.lock().await;
        if self.started.swap(false, Ordering::AcqRel) {
            self.engine.close().await;
            debug!("Browser transport destroyed");
        }
    }
}

/// Everything one request needs, detached from the transport so it can run in
/// its own task.
struct BrowserOperation {
    engine: Arc<dyn BrowserEngine>,
    timeout: Duration,
    auto_solve: bool,
    challenge_timeout: Duration,
    default_headers: Vec<(String, String)>,
}

impl BrowserOperation {
    async fn run(self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportError> {
        let started = Instant::now();

        let mut headers = self.default_headers.clone();
        merge_headers(&mut headers, &spec.extra_headers);
        let (cookie_headers, headers): (Vec<_>, Vec<_>) = headers
            .into_iter()
            .partition(|(name, _)| name.eq_ignore_ascii_case("cookie"));

        let cookies: Vec<(String, String)> = cookie_headers
            .iter()
            .flat_map(|(_, value)| value.split(';'))
            .filter_map(parse_set_cookie)
            .collect();
        if !cookies.is_empty() {
            self.engine.set_cookies(&spec.url, &cookies).await?;
        }
        // Store as the page will send it, so only what the site sets is reported.
        let before: HashMap<String, String> =
            self.engine.cookies(Some(&spec.url)).await?.into_iter().collect();

        let page_request = PageRequest {
            method: spec.method,
            url: spec.url.clone(),
            headers,
            body: spec.body.clone(),
        };

        let mut response = self.execute(&page_request).await?;

        if let Some(found) = challenge::detect(response.status, &response.headers, &response.body) {
            metrics::inc_challenges(TransportVariant::Browser);
            if !self.auto_solve {
                return Err(TransportError::ChallengeDetected {
                    url: spec.url,
                    status: response.status,
                    marker: found.marker,
                });
            }

            info!(url = %spec.url, marker = %found.marker, "Waiting for challenge to clear");
            if !self.wait_for_clearance().await? {
                return Err(TransportError::ChallengeDetected {
                    url: spec.url,
                    status: response.status,
                    marker: found.marker,
                });
            }

            response = self.execute(&page_request).await?;
            if let Some(found) =
                challenge::detect(response.status, &response.headers, &response.body)
            {
                return Err(TransportError::ChallengeDetected {
                    url: spec.url,
                    status: response.status,
                    marker: found.marker,
                });
            }
        }

        let after = self.engine.cookies(Some(&spec.url)).await?;
        let raw_set_cookie_headers = changed_cookies(&before, after);

        metrics::record_request(TransportVariant::Browser, started);

        Ok(ResponseEnvelope {
            status: response.status,
            headers: response
                .headers
                .into_iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case("set-cookie"))
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            body: response.body,
            raw_set_cookie_headers,
        })
    }

    async fn execute(&self, request: &PageRequest) -> Result<PageResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "Browser operation");
        let call = async {
            match request.method {
                Method::Get => self.engine.navigate(request).await,
                Method::Post => self.engine.fetch(request).await,
            }
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| TransportError::Timeout {
                url: request.url.clone(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    /// Poll the page until the challenge disappears. `false` on deadline.
    async fn wait_for_clearance(&self) -> Result<bool, TransportError> {
        let deadline = Instant::now() + self.challenge_timeout;
        while Instant::now() < deadline {
            tokio::time::sleep(CHALLENGE_POLL_INTERVAL).await;
            let html = self.engine.page_html().await?;
            if !challenge::page_has_challenge(&html) {
                return Ok(true);
            }
        }
        warn!(
            timeout_ms = self.challenge_timeout.as_millis() as u64,
            "Challenge did not clear in time"
        );
        Ok(false)
    }
}

/// Cookies in `after` that are absent from `before` or carry a new value,
/// rendered as `name=value`.
fn changed_cookies(before: &HashMap<String, String>, after: Vec<(String, String)>) -> Vec<String> {
    let mut seen = HashMap::with_capacity(after.len());
    for (name, value) in after {
        seen.insert(name, value);
    }
    let mut changed: Vec<String> = seen
        .into_iter()
        .filter(|(name, value)| before.get(name) != Some(value))
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    changed.sort();
    changed
}
