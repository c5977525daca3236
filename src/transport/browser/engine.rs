//! Seam between the browser transport and the engine that drives a browser.

use async_trait::async_trait;

use super::BrowserOptions;
use crate::error::TransportError;
use crate::transport::types::Method;

/// One page-level operation.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Method. GET navigates, POST runs an in-page fetch.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Headers to send, in order.
    pub headers: Vec<(String, String)>,
    /// Serialized body for POST.
    pub body: Option<String>,
}

/// What the page saw.
#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    /// HTTP status of the main response.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body (page text for navigations).
    pub body: String,
}

/// A controllable browser.
///
/// Calls are issued one at a time by [`super::BrowserTransport`]; engines do
/// not need to handle overlapping operations.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Start the browser and open a page.
    async fn launch(&self, options: &BrowserOptions) -> Result<(), TransportError>;

    /// Navigate the page to `request.url`.
    async fn navigate(&self, request: &PageRequest) -> Result<PageResponse, TransportError>;

    /// Run a fetch from within the page's origin.
    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, TransportError>;

    /// Install cookies for `url` into the browser's store.
    async fn set_cookies(&self, url: &str, cookies: &[(String, String)]) -> Result<(), TransportError>;

    /// Cookies visible to `url`, or every cookie when `None`.
    async fn cookies(&self, url: Option<&str>) -> Result<Vec<(String, String)>, TransportError>;

    /// Current page HTML.
    async fn page_html(&self) -> Result<String, TransportError>;

    /// Close the browser. Idempotent.
    async fn close(&self);
}
