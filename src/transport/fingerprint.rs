//! Direct HTTPS transport shaped after a real browser's fingerprint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, SET_COOKIE};
use tracing::{debug, info, warn};

use super::challenge;
use super::profile::BrowserProfile;
use super::types::{Method, RequestSpec, ResponseEnvelope, TransportConfig, TransportVariant, VariantOptions};
use super::{merge_headers, Transport};
use crate::error::TransportError;
use crate::metrics;

/// Options for [`FingerprintTransport`].
#[derive(Debug, Clone, Default)]
pub struct FingerprintOptions {
    /// Browser to imitate.
    pub profile: BrowserProfile,
    /// Upstream proxies, used round-robin. Credentials may be embedded in the URL.
    pub proxies: Vec<String>,
    /// Overrides the profile's User-Agent.
    pub user_agent: Option<String>,
}

impl FingerprintOptions {
    /// Options for a profile, no proxy.
    pub fn new(profile: BrowserProfile) -> Self {
        Self {
            profile,
            ..Default::default()
        }
    }

    /// Add an upstream proxy.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxies.push(proxy.into());
        self
    }

    fn validate(&self) -> Result<(), TransportError> {
        for proxy in &self.proxies {
            let url = url::Url::parse(&normalize_proxy(proxy)).map_err(|e| {
                TransportError::InvalidConfig(format!("invalid proxy url {proxy:?}: {e}"))
            })?;
            if url.host_str().is_none() {
                return Err(TransportError::InvalidConfig(format!(
                    "proxy url {proxy:?} has no host"
                )));
            }
        }
        Ok(())
    }
}

/// Proxies given as `host:port` default to `http://`.
fn normalize_proxy(proxy: &str) -> String {
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    }
}

/// HTTPS transport with browser-profile headers, header ordering and HTTP/2
/// settings. Safe for concurrent in-flight requests.
pub struct FingerprintTransport {
    config: TransportConfig,
    options: FingerprintOptions,
    /// One pooled client per proxy (or a single direct client).
    clients: RwLock<Vec<reqwest::Client>>,
    next_client: AtomicUsize,
}

impl FingerprintTransport {
    /// Build from config. Does not open any connection.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let options = match &config.variant_options {
            Some(VariantOptions::Fingerprint(options)) => options.clone(),
            Some(other) => {
                return Err(TransportError::InvalidConfig(format!(
                    "{} options supplied for fingerprint transport",
                    other.variant()
                )))
            }
            None => FingerprintOptions::default(),
        };
        options.validate()?;

        Ok(Self {
            config,
            options,
            clients: RwLock::new(Vec::new()),
            next_client: AtomicUsize::new(0),
        })
    }

    /// Profile in use.
    pub fn profile(&self) -> BrowserProfile {
        self.options.profile
    }

    fn build_client(&self, proxy: Option<&str>) -> Result<reqwest::Client, TransportError> {
        let profile = self.options.profile;
        let h2 = profile.http2();
        let user_agent = self
            .options
            .user_agent
            .clone()
            .unwrap_or_else(|| profile.user_agent().to_string());

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .user_agent(user_agent)
            .timeout(self.config.timeout)
            .connect_timeout(self.config.timeout.min(Duration::from_secs(10)))
            .tcp_nodelay(true)
            .tcp_keepalive(profile.keepalive())
            .pool_idle_timeout(Duration::from_secs(90))
            .http2_initial_stream_window_size(h2.initial_stream_window)
            .http2_initial_connection_window_size(h2.initial_connection_window)
            .http2_max_frame_size(h2.max_frame_size)
            .http2_max_header_list_size(h2.max_header_list_size)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(normalize_proxy(proxy)).map_err(|e| {
                TransportError::Connect {
                    variant: TransportVariant::Fingerprint,
                    reason: format!("invalid proxy: {e}"),
                }
            })?;
            builder = builder.proxy(proxy);
        }

        builder.build().map_err(|e| TransportError::Connect {
            variant: TransportVariant::Fingerprint,
            reason: e.to_string(),
        })
    }

    fn pick_client(&self) -> Result<reqwest::Client, TransportError> {
        let clients = self.clients.read();
        if clients.is_empty() {
            return Err(TransportError::NotReady(
                "fingerprint transport not initialized".to_string(),
            ));
        }
        let index = self.next_client.fetch_add(1, Ordering::Relaxed) % clients.len();
        Ok(clients[index].clone())
    }

    /// Profile headers, then config headers, then request headers; later
    /// layers replace earlier values without moving them.
    fn ordered_headers(&self, spec: &RequestSpec) -> Vec<(String, String)> {
        let mut headers = self.options.profile.default_headers();
        merge_headers(&mut headers, &self.config.headers);
        merge_headers(&mut headers, &spec.extra_headers);
        if spec.method == Method::Post
            && !headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
        {
            headers.push((CONTENT_TYPE.as_str().to_string(), "application/json".to_string()));
        }
        headers
    }

    fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::InvalidConfig(format!("invalid header name {name:?}: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::InvalidConfig(format!("invalid header value for {name}: {e}"))
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for FingerprintTransport {
    fn variant(&self) -> TransportVariant {
        TransportVariant::Fingerprint
    }

    async fn init(&self) -> Result<(), TransportError> {
        if !self.clients.read().is_empty() {
            return Ok(());
        }

        let clients = if self.options.proxies.is_empty() {
            vec![self.build_client(None)?]
        } else {
            self.options
                .proxies
                .iter()
                .map(|proxy| self.build_client(Some(proxy)))
                .collect::<Result<Vec<_>, _>>()?
        };

        info!(
            profile = %self.options.profile,
            proxies = self.options.proxies.len(),
            timeout_ms = self.config.timeout_ms(),
            "Fingerprint transport ready"
        );
        *self.clients.write() = clients;
        Ok(())
    }

    async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportError> {
        let client = self.pick_client()?;
        let headers = Self::header_map(&self.ordered_headers(&spec))?;
        let timeout_ms = self.config.timeout_ms();
        let started = Instant::now();

        let builder = match spec.method {
            Method::Get => client.get(&spec.url),
            Method::Post => client.post(&spec.url).body(spec.body.clone().unwrap_or_default()),
        };

        debug!(method = %spec.method, url = %spec.url, "Sending fingerprint request");

        // Dropping this future (caller abandoned the request) drops the
        // connection with it.
        let response = builder
            .headers(headers)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, &spec.url, timeout_ms))?;

        let status = response.status().as_u16();
        let mut response_headers = Vec::with_capacity(response.headers().len());
        let mut raw_set_cookie_headers = Vec::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            if name == SET_COOKIE {
                raw_set_cookie_headers.push(value);
            } else {
                response_headers.push((name.as_str().to_string(), value));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, &spec.url, timeout_ms))?;

        metrics::record_request(TransportVariant::Fingerprint, started);

        if let Some(found) = challenge::detect(status, &response_headers, &body) {
            warn!(url = %spec.url, status, marker = %found.marker, "Challenge page returned to fingerprint transport");
            metrics::inc_challenges(TransportVariant::Fingerprint);
            return Err(TransportError::ChallengeDetected {
                url: spec.url,
                status,
                marker: found.marker,
            });
        }

        debug!(status, cookies = raw_set_cookie_headers.len(), "Fingerprint response received");

        Ok(ResponseEnvelope {
            status,
            headers: response_headers,
            body,
            raw_set_cookie_headers,
        })
    }

    async fn destroy(&self) {
        let released = std::mem::take(&mut *self.clients.write());
        if !released.is_empty() {
            debug!(clients = released.len(), "Fingerprint transport released");
        }
    }
}
