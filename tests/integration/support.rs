//! Shared doubles: a recording browser engine and a factory that plugs it in.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use msu_trader::error::TransportError;
use msu_trader::transport::browser::{PageRequest, PageResponse};
use msu_trader::transport::{
    BrowserEngine, BrowserOptions, BrowserTransport, DefaultTransportFactory, Transport,
    TransportConfig, TransportFactory, TransportVariant,
};

pub const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// Browser engine that records what it is asked to do.
#[derive(Default)]
pub struct RecordingEngine {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    store: Mutex<BTreeMap<String, String>>,
    sets_on_next: Mutex<Vec<(String, String)>>,
    reverse_listing: bool,
    installed: Mutex<Vec<(String, String)>>,
    requests: Mutex<Vec<PageRequest>>,
    replies: Mutex<VecDeque<PageResponse>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Engine that lists its cookies in reverse name order, so `wat` comes
    /// before `msu_wat`.
    pub fn reverse_listing() -> Self {
        Self {
            reverse_listing: true,
            ..Self::default()
        }
    }

    /// Cookie the site sets while serving the next operation.
    pub fn site_sets_on_next(&self, name: &str, value: &str) {
        self.sets_on_next.lock().push((name.to_string(), value.to_string()));
    }

    /// Cookie the site sets inside the browser.
    pub fn site_cookie(&self, name: &str, value: &str) {
        self.store.lock().insert(name.to_string(), value.to_string());
    }

    /// Queue a reply; unscripted operations answer `200 {}`.
    pub fn reply(&self, status: u16, body: &str) {
        self.replies.lock().push_back(PageResponse {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        });
    }

    /// Cookies handed to `set_cookies`, in order.
    pub fn installed(&self) -> Vec<(String, String)> {
        self.installed.lock().clone()
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn operate(&self, request: &PageRequest) -> PageResponse {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let rotated: Vec<_> = self.sets_on_next.lock().drain(..).collect();
        self.store.lock().extend(rotated);

        self.replies.lock().pop_front().unwrap_or(PageResponse {
            status: 200,
            headers: Vec::new(),
            body: "{}".to_string(),
        })
    }
}

#[async_trait]
impl BrowserEngine for RecordingEngine {
    async fn launch(&self, _options: &BrowserOptions) -> Result<(), TransportError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn navigate(&self, request: &PageRequest) -> Result<PageResponse, TransportError> {
        Ok(self.operate(request).await)
    }

    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, TransportError> {
        Ok(self.operate(request).await)
    }

    async fn set_cookies(
        &self,
        _url: &str,
        cookies: &[(String, String)],
    ) -> Result<(), TransportError> {
        let mut store = self.store.lock();
        for (name, value) in cookies {
            store.insert(name.clone(), value.clone());
            self.installed.lock().push((name.clone(), value.clone()));
        }
        Ok(())
    }

    async fn cookies(&self, _url: Option<&str>) -> Result<Vec<(String, String)>, TransportError> {
        let mut cookies: Vec<(String, String)> = self
            .store
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if self.reverse_listing {
            cookies.reverse();
        }
        Ok(cookies)
    }

    async fn page_html(&self) -> Result<String, TransportError> {
        Ok("<html><body>ok</body></html>".to_string())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Real fingerprint transports; browser transports run on `engine`.
pub struct EngineFactory {
    pub engine: Arc<RecordingEngine>,
}

impl EngineFactory {
    pub fn new(engine: Arc<RecordingEngine>) -> Arc<Self> {
        Arc::new(Self { engine })
    }
}

impl TransportFactory for EngineFactory {
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        match config.variant {
            TransportVariant::Browser => Ok(Arc::new(BrowserTransport::with_engine(
                config.clone(),
                self.engine.clone(),
            )?)),
            TransportVariant::Fingerprint => DefaultTransportFactory.create(config),
        }
    }
}

pub fn fingerprint_config() -> TransportConfig {
    TransportConfig::new(TransportVariant::Fingerprint, Duration::from_secs(2))
        .with_header("origin", "https://msu.io")
}
