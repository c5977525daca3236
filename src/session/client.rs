//! One transport bound to the shared cookie jar.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use super::cookie_jar::{parse_set_cookie, render_cookie_header, CookieJar};
use crate::error::TransportError;
use crate::transport::{RequestSpec, ResponseEnvelope, Transport, TransportVariant};

/// Per-request additions on top of the session state.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers; replace transport defaults with the same name.
    pub headers: Vec<(String, String)>,
    /// Explicit cookies; win over jar cookies with the same name.
    pub cookies: Vec<(String, String)>,
}

impl RequestOptions {
    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add an explicit cookie.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }
}

/// Attaches jar cookies to outgoing requests and folds response cookies back
/// into the jar. Never retries.
pub struct SessionedClient {
    transport: Arc<dyn Transport>,
    jar: Arc<CookieJar>,
}

impl SessionedClient {
    /// Bind `transport` to `jar`.
    pub fn new(transport: Arc<dyn Transport>, jar: Arc<CookieJar>) -> Self {
        Self { transport, jar }
    }

    /// Variant of the bound transport.
    pub fn variant(&self) -> TransportVariant {
        self.transport.variant()
    }

    /// Bound transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Shared jar.
    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    /// GET `url`.
    pub async fn get(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.send(RequestSpec::get(url), options).await
    }

    /// POST an already-serialized JSON body to `url`.
    pub async fn post(
        &self,
        url: &str,
        body: impl Into<String>,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.send(RequestSpec::post(url, body), options).await
    }

    /// Send `spec` with session cookies attached.
    pub async fn send(
        &self,
        spec: RequestSpec,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, TransportError> {
        let spec = self.prepare(spec, options);
        trace!(url = %spec.url, cookie = spec.header("cookie").is_some(), "Sending with session");

        let response = self.transport.request(spec).await?;

        let cookies: Vec<(String, String)> = response
            .raw_set_cookie_headers
            .iter()
            .filter_map(|header| parse_set_cookie(header))
            .collect();
        if !cookies.is_empty() {
            debug!(count = cookies.len(), "Storing response cookies");
            self.jar.set_all(cookies);
        }

        Ok(response)
    }

    fn prepare(&self, mut spec: RequestSpec, options: RequestOptions) -> RequestSpec {
        for (name, value) in options.headers {
            spec = spec.with_header(name, value);
        }

        // Jar, then any Cookie header the caller supplied, then explicit cookies.
        let mut cookies: HashMap<String, String> = self.jar.get_all();
        if let Some(existing) = spec.header("cookie") {
            cookies.extend(existing.split(';').filter_map(parse_set_cookie));
        }
        cookies.extend(options.cookies);

        match render_cookie_header(&cookies) {
            Some(header) => spec.with_header("cookie", header),
            None => spec,
        }
    }
}
