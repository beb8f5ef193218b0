//! Playwright browser automation
//!
//! A single `node` sidecar runs `driver.js` and owns the browser. Requests
//! and replies are newline-delimited JSON, correlated by id, so several test
//! workers can share one sidecar.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::capture::{CaptureOptions, CaptureTarget};
use crate::error::{CaptureError, E2eError, E2eResult};
use crate::spec::{LoadState, Target, Viewport};

const DRIVER_SCRIPT: &str = include_str!("driver.js");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser '{}'", other))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    /// Base URL relative navigations are resolved against
    pub base_url: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub browser: Browser,
    pub headless: bool,
    /// Default timeout for every driver action
    pub default_timeout_ms: u64,
    /// Time allowed for the browser to come up
    pub launch_timeout_secs: u64,
    /// `node` executable
    pub node_binary: PathBuf,
    /// Directory holding the `node_modules` with `playwright` installed
    pub node_project_dir: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "https://prod.testrunz.com".to_string(),
            viewport_width: 1280,
            viewport_height: 720,
            browser: Browser::Chromium,
            headless: true,
            default_timeout_ms: 5000,
            launch_timeout_secs: 60,
            node_binary: PathBuf::from("node"),
            node_project_dir: PathBuf::from("."),
        }
    }
}

impl PlaywrightConfig {
    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.viewport_width,
            height: self.viewport_height,
        }
    }

    /// Resolve `url` against the base URL unless it is already absolute
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                url.trim_start_matches('/')
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScreenshotReply {
    binary: String,
}

#[derive(Deserialize)]
struct PageReply {
    page: String,
}

type DriverWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Request/reply plumbing to the sidecar
pub(crate) struct Connection {
    writer: tokio::sync::Mutex<DriverWriter>,
    pending: Mutex<HashMap<u64, oneshot::Sender<DriverReply>>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl Connection {
    /// Wire up `writer` for requests and spawn a task dispatching the
    /// replies read from `lines`
    pub(crate) fn open<R, W>(mut lines: Lines<R>, writer: W) -> Arc<Self>
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Arc::new(Connection {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        let reader = Arc::clone(&conn);
        tokio::spawn(async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<DriverReply>(&line) {
                        Ok(reply) => reader.dispatch(reply),
                        Err(_) => debug!(target: "playwright", "{}", line),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Driver read error: {}", e);
                        break;
                    }
                }
            }
            reader.shut();
        });

        conn
    }

    async fn call(&self, op: &str, params: Value) -> E2eResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut request = match params {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(E2eError::Playwright(format!("params for {} must be an object, got {}", op, other)))
            }
        };
        request.insert("id".to_string(), json!(id));
        request.insert("op".to_string(), json!(op));

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(E2eError::DriverClosed);
            }
            pending.insert(id, tx);
        }

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }

        debug!("driver -> {} #{}", op, id);
        let reply = rx.await.map_err(|_| E2eError::DriverClosed)?;

        if reply.ok {
            Ok(reply.result)
        } else {
            Err(E2eError::Driver {
                op: op.to_string(),
                message: reply.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }

    fn dispatch(&self, reply: DriverReply) {
        match self.pending.lock().remove(&reply.id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => warn!("Driver reply for unknown request #{}", reply.id),
        }
    }

    fn shut(&self) {
        let mut pending = self.pending.lock();
        self.closed.store(true, Ordering::Release);
        // Dropping the senders wakes every waiter with DriverClosed
        pending.clear();
    }
}

/// Playwright browser handle
pub struct PlaywrightHandle {
    conn: Arc<Connection>,
    child: tokio::sync::Mutex<Child>,
    config: PlaywrightConfig,

    // Keeps the driver script on disk for the sidecar's lifetime
    _script_dir: tempfile::TempDir,
}

impl PlaywrightHandle {
    /// Start the sidecar and launch the browser
    pub async fn launch(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(&config)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, DRIVER_SCRIPT)?;

        let node_modules = std::fs::canonicalize(&config.node_project_dir)
            .unwrap_or_else(|_| config.node_project_dir.clone())
            .join("node_modules");
        let options = json!({
            "browser": config.browser.as_str(),
            "headless": config.headless,
        });

        info!("Launching {} via Playwright", config.browser.as_str());

        let mut child = TokioCommand::new(&config.node_binary)
            .arg(&script_path)
            .current_dir(&config.node_project_dir)
            .env("NODE_PATH", &node_modules)
            .env("TESTRUNS_DRIVER_OPTIONS", options.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                E2eError::Playwright(format!("Failed to spawn {}: {}", config.node_binary.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "playwright", "{}", line);
                }
            });
        }

        let mut lines = BufReader::new(stdout).lines();

        // First line is the launch handshake
        let launch_timeout = Duration::from_secs(config.launch_timeout_secs);
        let handshake = tokio::time::timeout(launch_timeout, lines.next_line())
            .await
            .map_err(|_| E2eError::Timeout("browser launch".to_string()))??
            .ok_or(E2eError::DriverClosed)?;
        let ready: DriverReply = serde_json::from_str(&handshake)?;
        if !ready.ok {
            return Err(E2eError::Playwright(format!(
                "browser launch failed: {}",
                ready.error.unwrap_or_default()
            )));
        }

        let conn = Connection::open(lines, stdin);

        info!("Browser ready");

        Ok(Self {
            conn,
            child: tokio::sync::Mutex::new(child),
            config,
            _script_dir: script_dir,
        })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
        let status = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(&config.node_project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.config
    }

    /// Open a page in a fresh browser context
    pub async fn new_page(&self, viewport: Viewport) -> E2eResult<Page> {
        let result = self
            .conn
            .call(
                "newPage",
                json!({
                    "viewport": { "width": viewport.width, "height": viewport.height },
                    "timeout": self.config.default_timeout_ms,
                }),
            )
            .await?;
        let reply: PageReply = serde_json::from_value(result)?;

        Ok(Page {
            conn: Arc::clone(&self.conn),
            id: reply.page,
            config: Arc::new(self.config.clone()),
            owns_context: true,
        })
    }

    /// Close the browser and stop the sidecar
    pub async fn close(&self) -> E2eResult<()> {
        if let Err(e) = self.conn.call("shutdown", Value::Null).await {
            debug!("Driver shutdown: {}", e);
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("Driver did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

/// A browser tab, or a popup opened from one
#[derive(Clone)]
pub struct Page {
    conn: Arc<Connection>,
    id: String,
    config: Arc<PlaywrightConfig>,
    owns_context: bool,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("id", &self.id).finish()
    }
}

impl Page {
    fn params(&self, extra: Value) -> Value {
        let mut params = json!({ "page": self.id, "timeout": self.config.default_timeout_ms });
        if let (Value::Object(base), Value::Object(extra)) = (&mut params, extra) {
            base.extend(extra);
        }
        params
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.config.default_timeout_ms)
    }

    /// Navigate; relative URLs are resolved against the base URL
    pub async fn goto(&self, url: &str, wait_until: Option<LoadState>) -> E2eResult<()> {
        let url = self.config.resolve_url(url);
        debug!("goto {}", url);
        self.conn
            .call(
                "goto",
                self.params(json!({ "url": url, "waitUntil": wait_until.unwrap_or_default().as_str() })),
            )
            .await?;
        Ok(())
    }

    pub async fn wait_for_load_state(&self, state: LoadState) -> E2eResult<()> {
        self.conn
            .call("waitForLoadState", self.params(json!({ "state": state.as_str() })))
            .await?;
        Ok(())
    }

    pub async fn url(&self) -> E2eResult<String> {
        let value = self.conn.call("url", self.params(Value::Null)).await?;
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| E2eError::Playwright(format!("url returned {}", value)))
    }

    /// PNG bytes of the viewport, or of the whole scrollable page
    pub async fn screenshot(&self, full_page: bool) -> E2eResult<Vec<u8>> {
        let result = self
            .conn
            .call("screenshot", self.params(json!({ "fullPage": full_page })))
            .await?;
        decode_screenshot(result)
    }

    pub fn locator(&self, target: Target) -> Locator {
        Locator {
            page: self.clone(),
            target,
        }
    }

    pub async fn press_key(&self, key: &str) -> E2eResult<()> {
        self.conn.call("press", self.params(json!({ "key": key }))).await?;
        Ok(())
    }

    /// Click `trigger` and return the popup page it opens
    pub async fn click_for_popup(&self, trigger: &Target, timeout: Duration) -> E2eResult<Page> {
        let result = self
            .conn
            .call(
                "clickForPopup",
                self.params(json!({
                    "target": trigger.to_wire(),
                    "timeout": timeout.as_millis() as u64,
                })),
            )
            .await?;
        let reply: PageReply = serde_json::from_value(result)?;

        Ok(Page {
            conn: Arc::clone(&self.conn),
            id: reply.page,
            config: Arc::clone(&self.config),
            owns_context: false,
        })
    }

    pub async fn wait_for_timeout(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Close the page, and its browser context if the page created it
    pub async fn close(&self) -> E2eResult<()> {
        self.conn
            .call("closePage", self.params(json!({ "context": self.owns_context })))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CaptureTarget for Page {
    async fn capture_image(&self, options: &CaptureOptions) -> Result<Vec<u8>, CaptureError> {
        Ok(self.screenshot(options.full_page).await?)
    }
}

/// A lazily resolved element reference; re-located on every call
#[derive(Debug, Clone)]
pub struct Locator {
    page: Page,
    target: Target,
}

impl Locator {
    fn params(&self, extra: Value) -> Value {
        let mut params = self.page.params(json!({ "target": self.target.to_wire() }));
        if let (Value::Object(base), Value::Object(extra)) = (&mut params, extra) {
            base.extend(extra);
        }
        params
    }

    fn with_timeout(&self, timeout: Option<Duration>) -> Value {
        match timeout {
            Some(t) => json!({ "timeout": t.as_millis() as u64 }),
            None => Value::Null,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn click(&self, timeout: Option<Duration>) -> E2eResult<()> {
        self.page
            .conn
            .call("click", self.params(self.with_timeout(timeout)))
            .await?;
        Ok(())
    }

    pub async fn fill(&self, value: &str, timeout: Option<Duration>) -> E2eResult<()> {
        let mut params = self.params(self.with_timeout(timeout));
        params["value"] = json!(value);
        self.page.conn.call("fill", params).await?;
        Ok(())
    }

    pub async fn press(&self, key: &str) -> E2eResult<()> {
        self.page
            .conn
            .call("press", self.params(json!({ "key": key })))
            .await?;
        Ok(())
    }

    /// Check a checkbox; a no-op when already checked
    pub async fn check(&self) -> E2eResult<()> {
        self.page.conn.call("check", self.params(Value::Null)).await?;
        Ok(())
    }

    pub async fn is_visible(&self) -> E2eResult<bool> {
        self.bool_query("isVisible").await
    }

    pub async fn is_enabled(&self) -> E2eResult<bool> {
        self.bool_query("isEnabled").await
    }

    pub async fn is_checked(&self) -> E2eResult<bool> {
        self.bool_query("isChecked").await
    }

    pub async fn text_content(&self) -> E2eResult<Option<String>> {
        let value = self.page.conn.call("textContent", self.params(Value::Null)).await?;
        Ok(value.as_str().map(String::from))
    }

    /// PNG bytes clipped to this element
    pub async fn screenshot(&self) -> E2eResult<Vec<u8>> {
        let result = self.page.conn.call("screenshot", self.params(Value::Null)).await?;
        decode_screenshot(result)
    }

    async fn bool_query(&self, op: &str) -> E2eResult<bool> {
        let value = self.page.conn.call(op, self.params(Value::Null)).await?;
        value
            .as_bool()
            .ok_or_else(|| E2eError::Playwright(format!("{} returned {}", op, value)))
    }
}

#[async_trait]
impl CaptureTarget for Locator {
    async fn capture_image(&self, _options: &CaptureOptions) -> Result<Vec<u8>, CaptureError> {
        Ok(self.screenshot().await?)
    }
}

fn decode_screenshot(result: Value) -> E2eResult<Vec<u8>> {
    let reply: ScreenshotReply = serde_json::from_value(result)?;
    base64::engine::general_purpose::STANDARD
        .decode(reply.binary)
        .map_err(|e| E2eError::Playwright(format!("decode screenshot: {}", e)))
}

/// In-process stand-in for the node sidecar, answering from a closure
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use tokio::io::{duplex, split};

    pub(crate) type Reply = Result<Value, String>;

    pub(crate) const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    pub(crate) fn png() -> Reply {
        Ok(json!({ "binary": base64::engine::general_purpose::STANDARD.encode(PNG) }))
    }

    /// A page whose driver replies to each request with `respond(op, request)`,
    /// plus the ops the driver received, in order
    pub(crate) fn page<F>(respond: F) -> (Page, Arc<Mutex<Vec<String>>>)
    where
        F: Fn(&str, &Value) -> Reply + Send + 'static,
    {
        let (client, driver) = duplex(1 << 16);
        let (client_read, client_write) = split(client);
        let conn = Connection::open(BufReader::new(client_read).lines(), client_write);

        let ops = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&ops);
        tokio::spawn(async move {
            let (driver_read, mut driver_write) = split(driver);
            let mut requests = BufReader::new(driver_read).lines();
            while let Ok(Some(line)) = requests.next_line().await {
                let Ok(request) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let id = request["id"].clone();
                let op = request["op"].as_str().unwrap_or_default().to_string();
                seen.lock().push(op.clone());

                let reply = match respond(&op, &request) {
                    Ok(result) => json!({ "id": id, "ok": true, "result": result }),
                    Err(error) => json!({ "id": id, "ok": false, "error": error }),
                };
                let mut out = reply.to_string();
                out.push('\n');
                if driver_write.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let page = Page {
            conn,
            id: "page-1".to_string(),
            config: Arc::new(PlaywrightConfig::default()),
            owns_context: true,
        };
        (page, ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playwright_config_default() {
        let config = PlaywrightConfig::default();
        assert_eq!(config.browser, Browser::Chromium);
        assert!(config.headless);
        assert_eq!(config.viewport(), Viewport { width: 1280, height: 720 });
    }

    #[test]
    fn test_resolve_url() {
        let config = PlaywrightConfig {
            base_url: "https://prod.testrunz.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.resolve_url("/signup"), "https://prod.testrunz.com/signup");
        assert_eq!(config.resolve_url("forgot-password/"), "https://prod.testrunz.com/forgot-password/");
        assert_eq!(config.resolve_url("http://prod.testrunz.com/mypage/"), "http://prod.testrunz.com/mypage/");
    }

    #[test]
    fn test_browser_from_str() {
        assert_eq!("webkit".parse::<Browser>().unwrap(), Browser::Webkit);
        assert!("netscape".parse::<Browser>().is_err());
    }

    #[test]
    fn test_decode_screenshot() {
        let png = [0x89u8, b'P', b'N', b'G'];
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
        let bytes = decode_screenshot(json!({ "binary": encoded })).unwrap();
        assert_eq!(bytes, png);

        assert!(decode_screenshot(json!({ "binary": "***" })).is_err());
    }

    #[test]
    fn test_driver_reply_parses_failure() {
        let reply: DriverReply =
            serde_json::from_str(r#"{"id":7,"ok":false,"error":"Target closed"}"#).unwrap();
        assert_eq!(reply.id, 7);
        assert!(!reply.ok);
        assert_eq!(reply.error.as_deref(), Some("Target closed"));
        assert!(reply.result.is_null());
    }

    #[tokio::test]
    async fn test_page_and_element_screenshots_over_the_wire() {
        let (page, ops) = scripted::page(|op, request| match op {
            "screenshot" if request.get("target").is_some() => scripted::png(),
            "screenshot" if request["fullPage"] == json!(true) => scripted::png(),
            other => Err(format!("unexpected {}", other)),
        });

        let full = page.capture_image(&CaptureOptions::full_page()).await.unwrap();
        assert_eq!(full, scripted::PNG);

        let element = page.locator(Target::css("form"));
        let clipped = element.capture_image(&CaptureOptions::element()).await.unwrap();
        assert_eq!(clipped, scripted::PNG);

        assert_eq!(ops.lock().as_slice(), &["screenshot", "screenshot"]);
    }

    #[tokio::test]
    async fn test_driver_failure_surfaces_op_and_message() {
        let (page, _ops) = scripted::page(|_, _| Err("strict mode violation".to_string()));

        let err = page.locator(Target::text("Log in")).click(None).await.unwrap_err();
        match err {
            E2eError::Driver { op, message } => {
                assert_eq!(op, "click");
                assert_eq!(message, "strict mode violation");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_their_own_replies() {
        let (page, _ops) = scripted::page(|op, request| match op {
            "textContent" => Ok(request["target"]["css"].clone()),
            other => Err(format!("unexpected {}", other)),
        });

        let first = page.locator(Target::css("#email"));
        let second = page.locator(Target::css("#password"));
        let (a, b) = tokio::join!(first.text_content(), second.text_content());
        assert_eq!(a.unwrap().as_deref(), Some("#email"));
        assert_eq!(b.unwrap().as_deref(), Some("#password"));
    }
}
