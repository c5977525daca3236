//! Chromium driven over the DevTools protocol.
//!
//! The connection layer correlates JSON-RPC responses with pending calls by
//! id and fans protocol events out to subscribers:
//!
//! 1. `call()` assigns an id and parks a oneshot sender in the pending map
//! 2. The writer task pushes the frame onto the websocket
//! 3. The reader task routes frames with an `id` to the parked sender and
//!    broadcasts frames with a `method` as events

use std::net::TcpListener;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::engine::{BrowserEngine, PageRequest, PageResponse};
use super::BrowserOptions;
use crate::error::TransportError;
use crate::transport::types::TransportVariant;

/// Deadline for a single protocol command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How many times `/json/version` is polled after launch.
const ENDPOINT_ATTEMPTS: u32 = 50;

const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Page text: markup for HTML documents, rendered text otherwise (JSON
/// responses render inside a `<pre>`).
const PAGE_BODY_SCRIPT: &str = r#"(() => {
  const type = document.contentType || "";
  if (type.includes("html")) { return document.documentElement.outerHTML; }
  return document.body ? document.body.innerText : "";
})()"#;

/// `/json/version` response subset.
#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
    #[serde(rename = "Browser")]
    browser: Option<String>,
}

/// Protocol event.
#[derive(Debug, Clone)]
struct CdpEvent {
    method: String,
    params: Value,
    session_id: Option<String>,
}

type PendingMap = DashMap<u64, oneshot::Sender<Result<Value, String>>>;

/// JSON-RPC over the browser websocket.
struct CdpConnection {
    next_id: AtomicU64,
    pending: Arc<PendingMap>,
    events: broadcast::Sender<CdpEvent>,
    outgoing: mpsc::UnboundedSender<Message>,
    tasks: Vec<JoinHandle<()>>,
}

impl CdpConnection {
    async fn connect(ws_url: &str) -> Result<Self, TransportError> {
        let (socket, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| connect_error(format!("devtools websocket: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (events, _) = broadcast::channel(256);
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        dispatch(text.as_str(), &reader_pending, &reader_events)
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Devtools websocket closed");
                        break;
                    }
                }
            }
            // Fail every call still waiting.
            reader_pending.clear();
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            events,
            outgoing,
            tasks: vec![writer, reader],
        })
    }

    async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut frame = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            frame["sessionId"] = Value::String(session_id.to_string());
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.outgoing.send(Message::Text(frame.to_string().into())).is_err() {
            self.pending.remove(&id);
            return Err(TransportError::Network("devtools connection closed".to_string()));
        }

        let reply = tokio::time::timeout(COMMAND_TIMEOUT, rx).await.map_err(|_| {
            self.pending.remove(&id);
            TransportError::Network(format!("devtools command {method} timed out"))
        })?;

        reply
            .map_err(|_| TransportError::Network("devtools connection closed".to_string()))?
            .map_err(|message| TransportError::Network(format!("{method}: {message}")))
    }

    fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn dispatch(text: &str, pending: &PendingMap, events: &broadcast::Sender<CdpEvent>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Unparseable devtools frame");
            return;
        }
    };

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        if let Some((_, tx)) = pending.remove(&id) {
            let reply = match frame.get("error") {
                Some(error) => Err(error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown devtools error")
                    .to_string()),
                None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = tx.send(reply);
        }
        return;
    }

    if let Some(method) = frame.get("method").and_then(Value::as_str) {
        // No subscribers is fine.
        let _ = events.send(CdpEvent {
            method: method.to_string(),
            params: frame.get("params").cloned().unwrap_or(Value::Null),
            session_id: frame
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
}

/// Attached page target.
struct Page {
    connection: Arc<CdpConnection>,
    session_id: String,
}

impl Page {
    async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.connection
            .call(method, params, Some(&self.session_id))
            .await
    }

    async fn evaluate(&self, expression: &str, await_promise: bool) -> Result<Value, TransportError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": await_promise,
                    "returnByValue": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script error");
            return Err(TransportError::Network(format!("in-page script failed: {text}")));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }
}

/// Running browser and the page requests go through.
struct Session {
    page: Arc<Page>,
    child: Child,
    auth_task: Option<JoinHandle<()>>,
    /// Removed on drop.
    _profile_dir: tempfile::TempDir,
}

/// [`BrowserEngine`] that launches a local Chromium and drives one page.
#[derive(Default)]
pub struct CdpEngine {
    session: Mutex<Option<Session>>,
}

impl CdpEngine {
    /// Engine with nothing launched yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn page(&self) -> Result<Arc<Page>, TransportError> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.page.clone())
            .ok_or_else(|| TransportError::NotReady("browser not launched".to_string()))
    }

    async fn navigate_page(
        page: &Page,
        request: &PageRequest,
    ) -> Result<PageResponse, TransportError> {
        let headers: Map<String, Value> = request
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("user-agent"))
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        page.call("Network.setExtraHTTPHeaders", json!({ "headers": headers }))
            .await?;

        let mut events = page.connection.subscribe();
        let navigation = page
            .call("Page.navigate", json!({ "url": request.url }))
            .await?;
        if let Some(error) = navigation.get("errorText").and_then(Value::as_str) {
            return Err(TransportError::Network(format!(
                "navigation to {} failed: {error}",
                request.url
            )));
        }
        let loader_id = navigation
            .get("loaderId")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut status = None;
        let mut response_headers = Vec::new();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Devtools event stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TransportError::Network(
                        "devtools connection closed during navigation".to_string(),
                    ))
                }
            };
            if event.session_id.as_deref() != Some(page.session_id.as_str()) {
                continue;
            }

            match event.method.as_str() {
                "Network.responseReceived" => {
                    let is_document = event.params.get("type").and_then(Value::as_str)
                        == Some("Document");
                    let same_loader = loader_id.is_none()
                        || event.params.get("loaderId").and_then(Value::as_str)
                            == loader_id.as_deref();
                    if is_document && same_loader {
                        status = event
                            .params
                            .pointer("/response/status")
                            .and_then(Value::as_f64)
                            .map(|s| s as u16);
                        response_headers = header_pairs(event.params.pointer("/response/headers"));
                    }
                }
                "Page.loadEventFired" => break,
                _ => {}
            }
        }

        let body = page
            .evaluate(PAGE_BODY_SCRIPT, false)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(PageResponse {
            status: status.unwrap_or(200),
            headers: response_headers,
            body,
        })
    }
}

fn connect_error(reason: impl Into<String>) -> TransportError {
    TransportError::Connect {
        variant: TransportVariant::Browser,
        reason: reason.into(),
    }
}

fn header_pairs(headers: Option<&Value>) -> Vec<(String, String)> {
    headers
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_ascii_lowercase(),
                        value.as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn cookie_pairs(result: &Value) -> Vec<(String, String)> {
    result
        .get("cookies")
        .and_then(Value::as_array)
        .map(|cookies| {
            cookies
                .iter()
                .filter_map(|cookie| {
                    let name = cookie.get("name")?.as_str()?;
                    let value = cookie.get("value")?.as_str()?;
                    Some((name.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn find_chrome_executable() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &["chrome.exe", "msedge.exe", "chromium.exe"]
    } else {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium-browser",
            "chromium",
            "/snap/bin/chromium",
        ]
    };

    candidates.iter().find_map(|candidate| {
        if candidate.starts_with('/') {
            std::path::Path::new(candidate)
                .exists()
                .then(|| candidate.to_string())
        } else {
            which::which(candidate)
                .ok()
                .map(|path| path.to_string_lossy().into_owned())
        }
    })
}

fn free_port() -> Result<u16, TransportError> {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .map_err(|e| connect_error(format!("no free debugging port: {e}")))
}

fn launch_args(options: &BrowserOptions, port: u16, profile_dir: &std::path::Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--window-size=1920,1080".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(proxy) = &options.proxy_server {
        args.push(format!("--proxy-server={proxy}"));
    }
    if let Some(user_agent) = &options.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }
    args.extend(options.args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

async fn fetch_version(client: &reqwest::Client, port: u16) -> Result<VersionInfo, String> {
    let response = client
        .get(format!("http://127.0.0.1:{port}/json/version"))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("unexpected status {}", response.status()));
    }
    response.json().await.map_err(|e| e.to_string())
}

async fn wait_for_endpoint(child: &mut Child, port: u16) -> Result<VersionInfo, TransportError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(400))
        .build()
        .map_err(|e| connect_error(e.to_string()))?;

    let mut last_error = "endpoint not reachable".to_string();
    for _ in 0..ENDPOINT_ATTEMPTS {
        tokio::time::sleep(ENDPOINT_POLL_INTERVAL).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(connect_error(format!(
                "browser exited before the debugging endpoint came up ({status})"
            )));
        }
        match fetch_version(&client, port).await {
            Ok(info) => return Ok(info),
            Err(e) => last_error = e,
        }
    }
    Err(connect_error(format!(
        "debugging endpoint on port {port} not available: {last_error}"
    )))
}

/// Answer proxy auth challenges and release paused requests.
fn spawn_proxy_auth(page: Arc<Page>, username: String, password: String) -> JoinHandle<()> {
    let mut events = page.connection.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(request_id) = event.params.get("requestId").and_then(Value::as_str) else {
                continue;
            };
            let reply = match event.method.as_str() {
                "Fetch.requestPaused" => {
                    page.call("Fetch.continueRequest", json!({ "requestId": request_id }))
                        .await
                }
                "Fetch.authRequired" => {
                    page.call(
                        "Fetch.continueWithAuth",
                        json!({
                            "requestId": request_id,
                            "authChallengeResponse": {
                                "response": "ProvideCredentials",
                                "username": username,
                                "password": password,
                            }
                        }),
                    )
                    .await
                }
                _ => continue,
            };
            if let Err(e) = reply {
                warn!(error = %e, "Proxy auth handler failed");
            }
        }
    })
}

#[async_trait]
impl BrowserEngine for CdpEngine {
    async fn launch(&self, options: &BrowserOptions) -> Result<(), TransportError> {
        if self.session.lock().is_some() {
            return Ok(());
        }

        let executable = options
            .executable
            .clone()
            .or_else(find_chrome_executable)
            .ok_or_else(|| connect_error("no Chrome/Chromium executable found"))?;
        let port = match options.debugging_port {
            Some(port) => port,
            None => free_port()?,
        };
        let profile_dir = tempfile::Builder::new()
            .prefix("msu-browser-")
            .tempdir()
            .map_err(|e| connect_error(format!("profile dir: {e}")))?;

        let mut child = Command::new(&executable)
            .args(launch_args(options, port, profile_dir.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| connect_error(format!("failed to launch {executable}: {e}")))?;

        let version = wait_for_endpoint(&mut child, port).await?;
        let connection = Arc::new(CdpConnection::connect(&version.web_socket_debugger_url).await?);

        let target = connection
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await?;
        let target_id = target
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| connect_error("createTarget returned no targetId"))?;
        let attached = connection
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| connect_error("attachToTarget returned no sessionId"))?
            .to_string();

        let page = Arc::new(Page {
            connection,
            session_id,
        });
        for domain in ["Page.enable", "Network.enable", "Runtime.enable"] {
            page.call(domain, json!({})).await?;
        }

        let auth_task = match &options.proxy_credentials {
            Some(creds) => {
                let task = spawn_proxy_auth(
                    page.clone(),
                    creds.username.clone(),
                    creds.password.clone(),
                );
                page.call(
                    "Fetch.enable",
                    json!({ "handleAuthRequests": true, "patterns": [{ "urlPattern": "*" }] }),
                )
                .await?;
                Some(task)
            }
            None => None,
        };

        info!(
            browser = version.browser.as_deref().unwrap_or("unknown"),
            port,
            headless = options.headless,
            "Browser launched"
        );

        *self.session.lock() = Some(Session {
            page,
            child,
            auth_task,
            _profile_dir: profile_dir,
        });
        Ok(())
    }

    async fn navigate(&self, request: &PageRequest) -> Result<PageResponse, TransportError> {
        let page = self.page()?;
        Self::navigate_page(&page, request).await
    }

    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, TransportError> {
        let page = self.page()?;

        // The fetch must run from the target origin to carry its cookies.
        let target = url::Url::parse(&request.url)
            .map_err(|e| TransportError::Network(format!("invalid url {}: {e}", request.url)))?;
        let origin = target.origin().ascii_serialization();
        let current = page.evaluate("location.origin", false).await?;
        if current.as_str() != Some(origin.as_str()) {
            let landing = PageRequest {
                method: request.method,
                url: format!("{origin}/"),
                headers: Vec::new(),
                body: None,
            };
            Self::navigate_page(&page, &landing).await?;
        }

        let headers: Map<String, Value> = request
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("user-agent"))
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        let init = json!({
            "method": request.method.to_string(),
            "headers": headers,
            "body": request.body,
            "credentials": "include",
        });
        let script = format!(
            r#"(async () => {{
  const response = await fetch({url}, {init});
  const headers = {{}};
  response.headers.forEach((value, name) => {{ headers[name] = value; }});
  return {{ status: response.status, headers, body: await response.text() }};
}})()"#,
            url = Value::String(request.url.clone()),
            init = init,
        );

        let value = page.evaluate(&script, true).await?;
        let status = value
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .ok_or_else(|| TransportError::Network("in-page fetch returned no status".to_string()))?;

        Ok(PageResponse {
            status,
            headers: header_pairs(value.get("headers")),
            body: value
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn set_cookies(&self, url: &str, cookies: &[(String, String)]) -> Result<(), TransportError> {
        let page = self.page()?;
        let cookies: Vec<Value> = cookies
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value, "url": url }))
            .collect();
        page.call("Network.setCookies", json!({ "cookies": cookies }))
            .await
            .map(|_| ())
    }

    async fn cookies(&self, url: Option<&str>) -> Result<Vec<(String, String)>, TransportError> {
        let page = self.page()?;
        let result = match url {
            Some(url) => page.call("Network.getCookies", json!({ "urls": [url] })).await?,
            None => page.call("Network.getAllCookies", json!({})).await?,
        };
        Ok(cookie_pairs(&result))
    }

    async fn page_html(&self) -> Result<String, TransportError> {
        let page = self.page()?;
        Ok(page
            .evaluate("document.documentElement.outerHTML", false)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn close(&self) {
        let Some(mut session) = self.session.lock().take() else {
            return;
        };

        let close = session.page.connection.call("Browser.close", json!({}), None);
        if let Err(e) = tokio::time::timeout(Duration::from_secs(3), close).await {
            debug!(error = %e, "Browser.close did not answer");
        }
        if let Some(task) = session.auth_task.take() {
            task.abort();
        }
        session.page.connection.shutdown();
        if let Err(e) = session.child.kill().await {
            debug!(error = %e, "Browser process already gone");
        }
        info!("Browser closed");
    }
}
