//! Request/response envelopes and transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::browser::BrowserOptions;
use super::fingerprint::FingerprintOptions;
use crate::error::TransportError;

/// Transport back-end selector.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum TransportVariant {
    /// Direct HTTPS with a browser-like TLS/header fingerprint.
    #[strum(to_string = "fingerprint", serialize = "curl_cffi", serialize = "tls")]
    Fingerprint,
    /// Real browser driven over the DevTools protocol.
    #[strum(to_string = "browser", serialize = "chrome", serialize = "chromium")]
    Browser,
}

impl TransportVariant {
    /// Parse a configuration tag, reporting unknown tags as unsupported.
    pub fn parse(tag: &str) -> Result<Self, TransportError> {
        tag.trim()
            .parse()
            .map_err(|_| TransportError::UnsupportedVariant(tag.to_string()))
    }
}

/// Variant-specific options.
#[derive(Debug, Clone)]
pub enum VariantOptions {
    /// Options for [`TransportVariant::Fingerprint`].
    Fingerprint(FingerprintOptions),
    /// Options for [`TransportVariant::Browser`].
    Browser(BrowserOptions),
}

impl VariantOptions {
    /// Variant these options belong to.
    pub fn variant(&self) -> TransportVariant {
        match self {
            VariantOptions::Fingerprint(_) => TransportVariant::Fingerprint,
            VariantOptions::Browser(_) => TransportVariant::Browser,
        }
    }
}

/// Configuration a transport is built from. Immutable once used.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Which back-end to build.
    pub variant: TransportVariant,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Default headers, in send order.
    pub headers: Vec<(String, String)>,
    /// Variant-specific options; `None` means variant defaults.
    pub variant_options: Option<VariantOptions>,
}

impl TransportConfig {
    /// Config with default options for `variant`.
    pub fn new(variant: TransportVariant, timeout: Duration) -> Self {
        Self {
            variant,
            timeout,
            headers: Vec::new(),
            variant_options: None,
        }
    }

    /// Add a default header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set variant options.
    pub fn with_options(mut self, options: VariantOptions) -> Self {
        self.variant_options = Some(options);
        self
    }

    /// Upstream proxies the built transport will route through.
    pub fn proxy_count(&self) -> usize {
        match &self.variant_options {
            Some(VariantOptions::Fingerprint(options)) => options.proxies.len(),
            Some(VariantOptions::Browser(options)) => usize::from(options.proxy_server.is_some()),
            None => 0,
        }
    }

    /// Timeout in whole milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Same config targeting another variant, keeping timeout and headers.
    pub fn switched_to(&self, variant: TransportVariant, options: Option<VariantOptions>) -> Self {
        Self {
            variant,
            timeout: self.timeout,
            headers: self.headers.clone(),
            variant_options: options,
        }
    }

    /// Check that options, if present, match the variant.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.timeout.is_zero() {
            return Err(TransportError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(options) = &self.variant_options {
            if options.variant() != self.variant {
                return Err(TransportError::InvalidConfig(format!(
                    "{} options supplied for {} transport",
                    options.variant(),
                    self.variant
                )));
            }
        }
        Ok(())
    }
}

/// HTTP method subset the venue uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Method {
    /// GET.
    #[strum(to_string = "GET")]
    Get,
    /// POST.
    #[strum(to_string = "POST")]
    Post,
}

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Already-serialized JSON body.
    pub body: Option<String>,
    /// Headers on top of the transport defaults, in send order.
    pub extra_headers: Vec<(String, String)>,
}

impl RequestSpec {
    /// GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            extra_headers: Vec::new(),
        }
    }

    /// POST request with a serialized JSON body.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body.into()),
            extra_headers: Vec::new(),
        }
    }

    /// Add or replace a header (case-insensitive).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.extra_headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.extra_headers.push((name, value.into()));
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.extra_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Normalized response, identical across variants.
#[derive(Debug, Clone, Default)]
pub struct ResponseEnvelope {
    /// HTTP status code.
    pub status: u16,
    /// Response headers (lower-cased names, `set-cookie` excluded).
    pub headers: Vec<(String, String)>,
    /// Raw body text.
    pub body: String,
    /// Raw `Set-Cookie` header values.
    pub raw_set_cookie_headers: Vec<String>,
}

impl ResponseEnvelope {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parse the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}
