//! Scripted transport for tests.
//!
//! Responses are queued up front and replayed in order; every request and
//! lifecycle call is recorded so tests can assert on what the session layer
//! sent without any network access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::factory::TransportFactory;
use super::types::{RequestSpec, ResponseEnvelope, TransportConfig, TransportVariant};
use super::Transport;
use crate::error::TransportError;

/// Failure a mock can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// [`TransportError::Network`].
    Network,
    /// [`TransportError::Timeout`].
    Timeout,
    /// [`TransportError::ChallengeDetected`] with status 403.
    Challenge,
}

#[derive(Debug, Clone)]
enum MockReply {
    Response(ResponseEnvelope),
    Failure(MockFailure),
}

/// Configuration for mock transport behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Whether `init` fails.
    pub fail_init: bool,
    /// Simulated latency per request in milliseconds.
    pub latency_ms: u64,
}

/// Transport that replays scripted replies.
#[derive(Debug)]
pub struct MockTransport {
    variant: TransportVariant,
    config: MockConfig,
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<RequestSpec>>,
    session_cookies: Mutex<Vec<(String, String)>>,
    init_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    /// Mock answering `200 {}` to everything.
    pub fn new(variant: TransportVariant) -> Self {
        Self::with_config(variant, MockConfig::default())
    }

    /// Mock with custom behavior.
    pub fn with_config(variant: TransportVariant, config: MockConfig) -> Self {
        Self {
            variant,
            config,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            session_cookies: Mutex::new(Vec::new()),
            init_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue a response.
    pub fn push_response(&self, response: ResponseEnvelope) -> &Self {
        self.replies.lock().push_back(MockReply::Response(response));
        self
    }

    /// Queue a response with a JSON body and optional `Set-Cookie` values.
    pub fn push_json(&self, status: u16, body: &str, set_cookies: &[&str]) -> &Self {
        self.push_response(ResponseEnvelope {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
            raw_set_cookie_headers: set_cookies.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Queue a failure.
    pub fn push_failure(&self, failure: MockFailure) -> &Self {
        self.replies.lock().push_back(MockReply::Failure(failure));
        self
    }

    /// Cookies reported by `session_cookies`.
    pub fn set_session_cookies(&self, cookies: &[(&str, &str)]) {
        *self.session_cookies.lock() = cookies
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RequestSpec> {
        self.requests.lock().clone()
    }

    /// Most recent request.
    pub fn last_request(&self) -> Option<RequestSpec> {
        self.requests.lock().last().cloned()
    }

    /// Number of `init` calls.
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Number of `destroy` calls.
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    /// Whether `destroy` ran at least once.
    pub fn is_destroyed(&self) -> bool {
        self.destroy_calls() > 0
    }

    /// Highest number of simultaneously running requests.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn failure(&self, failure: MockFailure, url: &str) -> TransportError {
        match failure {
            MockFailure::Network => TransportError::Network("mock network failure".to_string()),
            MockFailure::Timeout => TransportError::Timeout {
                url: url.to_string(),
                timeout_ms: self.config.latency_ms,
            },
            MockFailure::Challenge => TransportError::ChallengeDetected {
                url: url.to_string(),
                status: 403,
                marker: "cf-mitigated: challenge".to_string(),
            },
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn variant(&self) -> TransportVariant {
        self.variant
    }

    async fn init(&self) -> Result<(), TransportError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_init {
            return Err(TransportError::Connect {
                variant: self.variant,
                reason: "mock init failure".to_string(),
            });
        }
        Ok(())
    }

    async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.requests.lock().push(spec.clone());

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Failure(failure)) => Err(self.failure(failure, &spec.url)),
            None => Ok(ResponseEnvelope {
                status: 200,
                body: "{}".to_string(),
                ..Default::default()
            }),
        }
    }

    async fn session_cookies(&self) -> Vec<(String, String)> {
        self.session_cookies.lock().clone()
    }

    async fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`MockTransport`]s.
///
/// Transports registered with [`prepare`](Self::prepare) are returned first,
/// in order; after that a fresh default mock is built per call.
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    prepared: Mutex<VecDeque<Arc<MockTransport>>>,
    created: Mutex<Vec<Arc<MockTransport>>>,
    configs: Mutex<Vec<TransportConfig>>,
    fail_variants: Mutex<Vec<TransportVariant>>,
}

impl MockTransportFactory {
    /// Empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `transport` on a later `create`.
    pub fn prepare(&self, transport: Arc<MockTransport>) -> &Self {
        self.prepared.lock().push_back(transport);
        self
    }

    /// Make `create` fail for `variant`.
    pub fn fail_create(&self, variant: TransportVariant) -> &Self {
        self.fail_variants.lock().push(variant);
        self
    }

    /// Every transport built so far.
    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }

    /// Configs passed to `create`, successful or not.
    pub fn configs(&self) -> Vec<TransportConfig> {
        self.configs.lock().clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        self.configs.lock().push(config.clone());
        config.validate()?;
        if self.fail_variants.lock().contains(&config.variant) {
            return Err(TransportError::UnsupportedVariant(config.variant.to_string()));
        }

        let prepared = self.prepared.lock().pop_front();
        let transport = prepared.unwrap_or_else(|| Arc::new(MockTransport::new(config.variant)));
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_are_replayed_in_order() {
        let mock = MockTransport::new(TransportVariant::Fingerprint);
        mock.push_json(200, r#"{"a":1}"#, &["wat=1"])
            .push_failure(MockFailure::Challenge);

        let first = mock.request(RequestSpec::get("https://msu.io/a")).await.unwrap();
        assert_eq!(first.raw_set_cookie_headers, vec!["wat=1".to_string()]);
        assert!(matches!(
            mock.request(RequestSpec::get("https://msu.io/b")).await,
            Err(TransportError::ChallengeDetected { .. })
        ));
        assert_eq!(mock.request(RequestSpec::get("https://msu.io/c")).await.unwrap().body, "{}");
        assert_eq!(mock.requests().len(), 3);
    }

    #[test]
    fn factory_prefers_prepared_transports() {
        let factory = MockTransportFactory::new();
        let prepared = Arc::new(MockTransport::new(TransportVariant::Browser));
        factory.prepare(prepared.clone());

        let config = TransportConfig::new(TransportVariant::Browser, Duration::from_secs(1));
        factory.create(&config).unwrap();
        factory.create(&config).unwrap();

        let created = factory.created();
        assert_eq!(created.len(), 2);
        assert!(Arc::ptr_eq(&created[0], &prepared));
    }

    #[test]
    fn scripted_init_failure() {
        let mock = MockTransport::with_config(
            TransportVariant::Browser,
            MockConfig {
                fail_init: true,
                ..Default::default()
            },
        );
        tokio_test::assert_err!(tokio_test::block_on(mock.init()));
        tokio_test::block_on(mock.destroy());
        assert_eq!(mock.init_calls(), 1);
        assert!(mock.is_destroyed());
    }

    #[test]
    fn factory_rejects_failing_variant() {
        let factory = MockTransportFactory::new();
        factory.fail_create(TransportVariant::Browser);
        let config = TransportConfig::new(TransportVariant::Browser, Duration::from_secs(1));
        assert!(matches!(
            factory.create(&config),
            Err(TransportError::UnsupportedVariant(_))
        ));
        tokio_test::assert_ok!(factory.create(&config.switched_to(TransportVariant::Fingerprint, None)));
        assert_eq!(factory.configs().len(), 2);
    }
}
