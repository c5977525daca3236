//! Application configuration loaded from environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::error::TransportError;
use crate::transport::{
    BrowserOptions, BrowserProfile, FingerprintOptions, ProxyCredentials, TransportConfig,
    TransportVariant, VariantOptions,
};
use crate::venue::{FallbackPolicy, VenueSettings};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Wallet ===
    /// Wallet private key (hex, starts with 0x).
    pub private_key: String,

    // === Venue ===
    /// Marketplace origin.
    #[serde(default = "default_venue_base_url")]
    pub venue_base_url: String,

    // === Transport Strategy ===
    /// Initial transport: `fingerprint` or `browser`.
    #[serde(default = "default_request_strategy")]
    pub request_strategy: String,

    /// Variant to switch to when a call hits a challenge page.
    #[serde(default)]
    pub challenge_fallback: Option<String>,

    /// Per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Browser profile the fingerprint transport imitates (e.g. chrome120).
    #[serde(default = "default_impersonate")]
    pub impersonate: String,

    /// Comma-separated upstream proxies for the fingerprint transport.
    #[serde(default)]
    pub proxy_urls: String,

    /// Route fingerprint requests through `proxy_urls`.
    #[serde(default)]
    pub use_proxy: bool,

    // === Browser ===
    /// Run the browser without a window.
    #[serde(default = "default_true")]
    pub browser_headless: bool,

    /// Extra comma-separated browser arguments.
    #[serde(default)]
    pub browser_args: String,

    /// Browser executable; discovered on PATH when unset.
    #[serde(default)]
    pub browser_executable: Option<String>,

    /// Browser upstream proxy.
    #[serde(default)]
    pub browser_proxy: Option<String>,

    /// Browser proxy username.
    #[serde(default)]
    pub browser_proxy_username: Option<String>,

    /// Browser proxy password.
    #[serde(default)]
    pub browser_proxy_password: Option<String>,

    /// Wait for challenge pages to clear instead of failing.
    #[serde(default = "default_true")]
    pub auto_solve_challenge: bool,

    /// How long to wait for a challenge to clear.
    #[serde(default = "default_challenge_timeout_ms")]
    pub challenge_timeout_ms: u64,

    // === Orders ===
    /// Stagger between purchase burst attempts.
    #[serde(default = "default_concurrent_interval_ms")]
    pub concurrent_interval_ms: u64,

    /// Refuse real orders unless each call confirms them.
    #[serde(default = "default_true")]
    pub require_confirmation: bool,

    // === Logging ===
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Emit JSON log lines.
    #[serde(default)]
    pub log_json: bool,
}

fn default_venue_base_url() -> String {
    "https://msu.io".to_string()
}

fn default_request_strategy() -> String {
    "fingerprint".to_string()
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_impersonate() -> String {
    "chrome120".to_string()
}

fn default_true() -> bool {
    true
}

fn default_challenge_timeout_ms() -> u64 {
    15_000
}

fn default_concurrent_interval_ms() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.private_key.is_empty() {
            return Err("PRIVATE_KEY is required".to_string());
        }

        if !self.private_key.starts_with("0x") {
            return Err("PRIVATE_KEY must start with 0x".to_string());
        }

        if url::Url::parse(&self.venue_base_url).is_err() {
            return Err(format!("VENUE_BASE_URL {:?} is not a URL", self.venue_base_url));
        }

        TransportVariant::parse(&self.request_strategy)
            .map_err(|_| format!("REQUEST_STRATEGY {:?} is not supported", self.request_strategy))?;

        if let Some(fallback) = &self.challenge_fallback {
            TransportVariant::parse(fallback)
                .map_err(|_| format!("CHALLENGE_FALLBACK {fallback:?} is not supported"))?;
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than 0".to_string());
        }

        if self.impersonate.parse::<BrowserProfile>().is_err() {
            return Err(format!("IMPERSONATE {:?} is not a known profile", self.impersonate));
        }

        if self.use_proxy && split_list(&self.proxy_urls).is_empty() {
            return Err("USE_PROXY requires PROXY_URLS".to_string());
        }

        if self.browser_proxy_username.is_some() && self.browser_proxy.is_none() {
            return Err("BROWSER_PROXY_USERNAME requires BROWSER_PROXY".to_string());
        }

        Ok(())
    }

    /// Initial transport variant.
    pub fn variant(&self) -> Result<TransportVariant, TransportError> {
        TransportVariant::parse(&self.request_strategy)
    }

    /// Options for the fingerprint transport.
    pub fn fingerprint_options(&self) -> Result<FingerprintOptions, TransportError> {
        let profile = self.impersonate.parse::<BrowserProfile>().map_err(|_| {
            TransportError::InvalidConfig(format!("unknown profile {:?}", self.impersonate))
        })?;
        let mut options = FingerprintOptions::new(profile);
        if self.use_proxy {
            options.proxies = split_list(&self.proxy_urls);
        }
        Ok(options)
    }

    /// Options for the browser transport.
    pub fn browser_options(&self) -> BrowserOptions {
        let proxy_credentials = self
            .browser_proxy_username
            .as_ref()
            .map(|username| ProxyCredentials {
                username: username.clone(),
                password: self.browser_proxy_password.clone().unwrap_or_default(),
            });
        BrowserOptions {
            headless: self.browser_headless,
            args: split_list(&self.browser_args),
            executable: self.browser_executable.clone(),
            proxy_server: self.browser_proxy.clone(),
            proxy_credentials,
            auto_solve_challenge: self.auto_solve_challenge,
            challenge_timeout: Duration::from_millis(self.challenge_timeout_ms),
            ..Default::default()
        }
    }

    /// Options for `variant` built from this configuration.
    pub fn variant_options(&self, variant: TransportVariant) -> Result<VariantOptions, TransportError> {
        Ok(match variant {
            TransportVariant::Fingerprint => VariantOptions::Fingerprint(self.fingerprint_options()?),
            TransportVariant::Browser => VariantOptions::Browser(self.browser_options()),
        })
    }

    /// Transport configuration for the initial strategy, with the venue's
    /// default headers.
    pub fn transport_config(&self) -> Result<TransportConfig, TransportError> {
        let variant = self.variant()?;
        let origin = self.venue_base_url.trim_end_matches('/');
        Ok(
            TransportConfig::new(variant, Duration::from_millis(self.request_timeout_ms))
                .with_header("accept", "application/json, text/plain, */*")
                .with_header("accept-language", "en-US,en;q=0.9")
                .with_header("origin", origin)
                .with_header("referer", format!("{origin}/marketplace"))
                .with_options(self.variant_options(variant)?),
        )
    }

    /// Challenge fallback policy.
    pub fn fallback_policy(&self) -> Result<FallbackPolicy, TransportError> {
        match &self.challenge_fallback {
            None => Ok(FallbackPolicy::disabled()),
            Some(tag) => {
                let variant = TransportVariant::parse(tag)?;
                Ok(FallbackPolicy::switch_to(variant, Some(self.variant_options(variant)?)))
            }
        }
    }

    /// Order placement tunables.
    pub fn venue_settings(&self) -> VenueSettings {
        VenueSettings {
            concurrent_interval: Duration::from_millis(self.concurrent_interval_ms),
            require_confirmation: self.require_confirmation,
            ..Default::default()
        }
    }
}
