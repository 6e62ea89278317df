//! Playwright browser automation
//!
//! Each browser session is a long-lived Node.js process running a small
//! bridge script. Requests and responses are single JSON lines over the
//! child's stdin/stdout:
//!
//! ```text
//! -> {"id":3,"method":"goto","params":{"page":1,"url":"https://example.com"}}
//! <- {"id":3,"ok":true,"result":null}
//! <- {"id":4,"ok":false,"error":"TimeoutError: ..."}
//! ```
//!
//! Screenshots come back base64-encoded. Playwright itself is resolved from
//! the working directory, so it must be installed in the project running pixl.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, BrowserSession, Page};
use crate::error::{PixlError, PixlResult};

const BRIDGE_SCRIPT: &str = r#"
const path = require('path');
const readline = require('readline');
const { createRequire } = require('module');

const playwright = createRequire(path.join(process.cwd(), 'package.json'))('playwright');

let browser = null;
const pages = new Map();
let nextPage = 1;

const page = (params) => {
  const p = pages.get(params.page);
  if (!p) throw new Error(`unknown page ${params.page}`);
  return p;
};

const handlers = {
  launch: async ({ browser: kind, headless, args }) => {
    browser = await playwright[kind].launch({ headless, args });
    return null;
  },
  newPage: async () => {
    const p = await browser.newPage();
    const id = nextPage++;
    pages.set(id, p);
    return { page: id };
  },
  setDefaultTimeout: async (params) => { page(params).setDefaultTimeout(params.timeout); return null; },
  goto: async (params) => { await page(params).goto(params.url); return null; },
  evaluate: async (params) => {
    const value = await page(params).evaluate(params.script);
    return value === undefined ? null : value;
  },
  click: async (params) => { await page(params).click(params.selector); return null; },
  fill: async (params) => { await page(params).fill(params.selector, params.value); return null; },
  type: async (params) => { await page(params).type(params.selector, params.text); return null; },
  press: async (params) => { await page(params).keyboard.press(params.key); return null; },
  hover: async (params) => { await page(params).hover(params.selector); return null; },
  focus: async (params) => { await page(params).focus(params.selector); return null; },
  selectOption: async (params) => { await page(params).selectOption(params.selector, params.value); return null; },
  waitForSelector: async (params) => {
    const options = params.timeout == null ? {} : { timeout: params.timeout };
    await page(params).waitForSelector(params.selector, options);
    return null;
  },
  mouseMove: async (params) => { await page(params).mouse.move(params.x, params.y); return null; },
  screenshot: async (params) => {
    const p = page(params);
    await p.setViewportSize({ width: params.width, height: 2 });
    const data = await p.screenshot({ fullPage: true });
    return { data: data.toString('base64') };
  },
  close: async () => {
    if (browser) await browser.close();
    browser = null;
    return null;
  },
};

const rl = readline.createInterface({ input: process.stdin });

rl.on('line', async (line) => {
  let request;
  try {
    request = JSON.parse(line);
  } catch (error) {
    return;
  }
  const respond = (body) => process.stdout.write(JSON.stringify({ id: request.id, ...body }) + '\n');
  try {
    const handler = handlers[request.method];
    if (!handler) throw new Error(`unknown method ${request.method}`);
    respond({ ok: true, result: await handler(request.params || {}) });
  } catch (error) {
    respond({ ok: false, error: error && error.stack ? error.stack : String(error) });
  }
});

rl.on('close', async () => {
  if (browser) await browser.close();
  process.exit(0);
});
"#;

/// How long a closing bridge may take before it is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    fn launch_args(&self) -> Vec<&'static str> {
        match self {
            Browser::Chromium => vec!["--no-sandbox"],
            Browser::Firefox | Browser::Webkit => Vec::new(),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node_binary: PathBuf,

    pub browser: Browser,

    /// Directory Playwright is resolved from; the current directory if unset
    pub working_dir: Option<PathBuf>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            browser: Browser::Chromium,
            working_dir: None,
        }
    }
}

/// Launches one Playwright bridge process per session
#[derive(Debug, Clone, Default)]
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
}

impl PlaywrightDriver {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn launch(&self, headless: bool) -> PixlResult<Box<dyn BrowserSession>> {
        let bridge = Bridge::spawn(&self.config).await?;

        let params = json!({
            "browser": self.config.browser.as_str(),
            "headless": headless,
            "args": self.config.browser.launch_args(),
        });
        if let Err(e) = bridge.request("launch", params).await {
            bridge.shutdown().await;
            return Err(PixlError::BrowserLaunch(e.to_string()));
        }

        info!("Launched {} (headless: {})", self.config.browser.as_str(), headless);
        Ok(Box::new(PlaywrightSession {
            bridge: Arc::new(bridge),
        }))
    }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

struct BridgeIo {
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A running Node.js bridge process
struct Bridge {
    child: Mutex<Child>,
    io: Mutex<BridgeIo>,
    next_id: AtomicU64,
    _script_dir: TempDir,
}

impl Bridge {
    async fn spawn(config: &PlaywrightConfig) -> PixlResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("pixl-bridge.js");
        tokio::fs::write(&script_path, BRIDGE_SCRIPT).await?;

        let mut command = TokioCommand::new(&config.node_binary);
        command
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            PixlError::BrowserLaunch(format!("could not start {}: {}", config.node_binary.display(), e))
        })?;
        debug!("Started Playwright bridge: {}", script_path.display());

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PixlError::BrowserLaunch("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PixlError::BrowserLaunch("bridge stdout unavailable".to_string()))?;

        Ok(Self {
            child: Mutex::new(child),
            io: Mutex::new(BridgeIo {
                stdin: Some(stdin),
                stdout: BufReader::new(stdout).lines(),
            }),
            next_id: AtomicU64::new(1),
            _script_dir: script_dir,
        })
    }

    /// Send one request and wait for the response with the same id
    async fn request(&self, method: &str, params: Value) -> PixlResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&Request { id, method, params })?;
        line.push('\n');

        let mut io = self.io.lock().await;
        let stdin = io
            .stdin
            .as_mut()
            .ok_or_else(|| PixlError::Protocol("bridge already closed".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        loop {
            let Some(line) = io.stdout.next_line().await? else {
                return Err(PixlError::Protocol(format!("bridge exited during '{}'", method)));
            };
            let response: Response = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(_) => {
                    debug!("[bridge] {}", line);
                    continue;
                }
            };
            if response.id != id {
                warn!("Discarding stale bridge response {} (waiting for {})", response.id, id);
                continue;
            }
            return if response.ok {
                Ok(response.result)
            } else {
                Err(PixlError::Browser(
                    response.error.unwrap_or_else(|| format!("'{}' failed", method)),
                ))
            };
        }
    }

    /// Close stdin so the bridge exits, killing it if it lingers
    async fn shutdown(&self) {
        self.io.lock().await.stdin.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("Playwright bridge exited: {}", status),
            Ok(Err(e)) => warn!("Could not wait for Playwright bridge: {}", e),
            Err(_) => {
                warn!("Playwright bridge did not exit, killing it");
                if let Err(e) = child.kill().await {
                    warn!("Could not kill Playwright bridge: {}", e);
                }
            }
        }
    }
}

pub struct PlaywrightSession {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn new_page(&self) -> PixlResult<Box<dyn Page>> {
        let result = self.bridge.request("newPage", json!({})).await?;
        let page_id = result
            .get("page")
            .and_then(Value::as_u64)
            .ok_or_else(|| PixlError::Protocol(format!("newPage returned {}", result)))?;
        Ok(Box::new(PlaywrightPage {
            bridge: Arc::clone(&self.bridge),
            page_id,
        }))
    }

    async fn close(&self) -> PixlResult<()> {
        let closed = self.bridge.request("close", json!({})).await;
        self.bridge.shutdown().await;
        closed.map(|_| ())
    }
}

pub struct PlaywrightPage {
    bridge: Arc<Bridge>,
    page_id: u64,
}

impl PlaywrightPage {
    async fn call(&self, method: &str, mut params: Value) -> PixlResult<Value> {
        if let Value::Object(map) = &mut params {
            map.insert("page".to_string(), json!(self.page_id));
        }
        self.bridge.request(method, params).await
    }
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn set_default_timeout(&self, timeout: Duration) -> PixlResult<()> {
        self.call("setDefaultTimeout", json!({ "timeout": timeout.as_millis() as u64 }))
            .await
            .map(|_| ())
    }

    async fn goto(&self, url: &str) -> PixlResult<()> {
        self.call("goto", json!({ "url": url })).await.map(|_| ())
    }

    async fn evaluate(&self, script: &str) -> PixlResult<Value> {
        self.call("evaluate", json!({ "script": script })).await
    }

    async fn click(&self, selector: &str) -> PixlResult<()> {
        self.call("click", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn fill(&self, selector: &str, value: &str) -> PixlResult<()> {
        self.call("fill", json!({ "selector": selector, "value": value }))
            .await
            .map(|_| ())
    }

    async fn type_text(&self, selector: &str, text: &str) -> PixlResult<()> {
        self.call("type", json!({ "selector": selector, "text": text }))
            .await
            .map(|_| ())
    }

    async fn press_key(&self, key: &str) -> PixlResult<()> {
        self.call("press", json!({ "key": key })).await.map(|_| ())
    }

    async fn hover(&self, selector: &str) -> PixlResult<()> {
        self.call("hover", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn focus(&self, selector: &str) -> PixlResult<()> {
        self.call("focus", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn select_option(&self, selector: &str, value: &str) -> PixlResult<()> {
        self.call("selectOption", json!({ "selector": selector, "value": value }))
            .await
            .map(|_| ())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Option<Duration>) -> PixlResult<()> {
        let timeout = timeout.map(|t| t.as_millis() as u64);
        self.call("waitForSelector", json!({ "selector": selector, "timeout": timeout }))
            .await
            .map(|_| ())
    }

    async fn mouse_move(&self, x: f64, y: f64) -> PixlResult<()> {
        self.call("mouseMove", json!({ "x": x, "y": y })).await.map(|_| ())
    }

    async fn screenshot(&self, width: u32) -> PixlResult<Vec<u8>> {
        let result = self.call("screenshot", json!({ "width": width })).await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| PixlError::Protocol("screenshot returned no data".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| PixlError::Protocol(format!("invalid screenshot encoding: {}", e)))
    }
}
