//! Playwright driver hosted in a long-lived Node.js process
//!
//! Requests and replies are JSON lines over the child's stdin/stdout. The
//! child also emits unsolicited events: page console output, page close and
//! browser disconnect. When the process exits every pending request fails
//! and the browser reports itself disconnected.
//!
//! Expected setup: Node.js on PATH (or `[browser] node_path`), the
//! `playwright` npm package resolvable by Node, and a Chromium install
//! (`npx playwright install chromium`).

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use super::driver::{Browser, BrowserLauncher, Page};
use super::log::EventLog;
use crate::config::BrowserConfig;
use crate::error::{MediaError, Result};

const BRIDGE_JS: &str = r#"
const readline = require('readline');

function emit(obj) { process.stdout.write(JSON.stringify(obj) + '\n'); }

let pw;
try { pw = require('playwright'); } catch (e) {
  emit({ event: 'fatal', error: 'Playwright is not installed for Node.js (require("playwright") failed)' });
  process.exit(1);
}

let browser = null;
const pages = new Map();
let nextPage = 1;

function pageOf(id) {
  const page = pages.get(id);
  if (!page) throw new Error('page ' + id + ' is closed');
  return page;
}

async function handle(req) {
  const p = req.params || {};
  switch (req.method) {
    case 'launch':
      browser = await pw.chromium.launch({
        headless: p.headless !== false,
        args: ['--no-sandbox', '--disable-setuid-sandbox'],
      });
      browser.on('disconnected', () => emit({ event: 'disconnected' }));
      return {};
    case 'newPage': {
      if (!browser) throw new Error('browser is not launched');
      const page = await browser.newPage();
      const id = nextPage++;
      pages.set(id, page);
      page.on('console', (msg) => emit({ event: 'console', page: id, level: msg.type(), text: msg.text() }));
      page.on('close', () => { pages.delete(id); emit({ event: 'pageclosed', page: id }); });
      return { page: id };
    }
    case 'goto':
      await pageOf(p.page).goto(p.url, { waitUntil: 'networkidle' });
      return {};
    case 'title':
      return { title: await pageOf(p.page).title() };
    case 'screenshot': {
      const buf = await pageOf(p.page).screenshot({ fullPage: !!p.fullPage, type: 'png' });
      return { data: buf.toString('base64') };
    }
    case 'evaluate': {
      const expr = '(' + p.script + ')(' + JSON.stringify(p.arg === undefined ? null : p.arg) + ')';
      const value = await pageOf(p.page).evaluate(expr);
      return { value: value === undefined ? null : value };
    }
    case 'close':
      if (browser) { const b = browser; browser = null; await b.close(); }
      return {};
    default:
      throw new Error('unknown method: ' + req.method);
  }
}

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', (line) => {
  let req;
  try { req = JSON.parse(line); } catch (_) { return; }
  handle(req).then(
    (result) => emit({ id: req.id, ok: true, result }),
    (e) => emit({ id: req.id, ok: false, error: String(e && e.message ? e.message : e) }),
  );
});
rl.on('close', async () => {
  try { if (browser) await browser.close(); } catch (_) {}
  process.exit(0);
});
"#;

/// One line written by the bridge
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeMessage {
    Reply {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        page: Option<u64>,
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;

/// State shared between the request side and the stdout reader task
struct Shared {
    pending: Pending,
    connected: AtomicBool,
    closed_pages: Mutex<HashSet<u64>>,
    fatal: Mutex<Option<String>>,
}

struct Bridge {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Bridge {
    async fn spawn(config: &BrowserConfig, events: Arc<EventLog>) -> Result<Self> {
        let mut cmd = Command::new(&config.node_path);
        if let Ok(node_path) = std::env::var("MEDIA_SCRAPER_NODE_PATH") {
            cmd.env("NODE_PATH", node_path);
        }
        let mut child = cmd
            .arg("-e")
            .arg(BRIDGE_JS)
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                MediaError::BackendUnavailable(format!(
                    "Browser automation requires Node.js (`{}`) and the Playwright npm package: {}",
                    config.node_path, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Browser("missing stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Browser("missing stdout pipe".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "media_scraper_mcp::browser", "{}", line);
                }
            });
        }

        let shared = Arc::new(Shared {
            pending: Arc::new(Mutex::new(HashMap::new())),
            connected: AtomicBool::new(true),
            closed_pages: Mutex::new(HashSet::new()),
            fatal: Mutex::new(None),
        });

        let reader_shared = shared.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<BridgeMessage>(&line) {
                    Ok(message) => dispatch_message(&reader_shared, &events, message),
                    Err(_) => tracing::debug!("Ignoring bridge output: {}", line),
                }
            }
            reader_shared.connected.store(false, Ordering::SeqCst);
            // Dropping the senders fails every outstanding request
            lock(&reader_shared.pending).clear();
        });

        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            shared,
            next_id: AtomicU64::new(1),
            timeout: Duration::from_secs(config.command_timeout_secs),
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn exit_reason(&self) -> String {
        lock(&self.shared.fatal)
            .clone()
            .unwrap_or_else(|| "browser process exited".to_string())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(MediaError::Browser(self.exit_reason()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);

        let mut line = json!({ "id": id, "method": method, "params": params }).to_string();
        line.push('\n');
        {
            let mut stdin = self.stdin.lock().await;
            let written = match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                lock(&self.shared.pending).remove(&id);
                return Err(MediaError::Browser(format!("{}: {}", self.exit_reason(), e)));
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(MediaError::Browser(message)),
            Ok(Err(_)) => Err(MediaError::Browser(self.exit_reason())),
            Err(_) => {
                lock(&self.shared.pending).remove(&id);
                Err(MediaError::Browser(format!(
                    "{} timed out after {}s",
                    method,
                    self.timeout.as_secs()
                )))
            }
        }
    }

    async fn shutdown(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn dispatch_message(shared: &Shared, events: &EventLog, message: BridgeMessage) {
    match message {
        BridgeMessage::Reply { id, ok, result, error } => {
            let reply = if ok {
                Ok(result)
            } else {
                Err(error.unwrap_or_else(|| "browser command failed".to_string()))
            };
            if let Some(tx) = lock(&shared.pending).remove(&id) {
                let _ = tx.send(reply);
            }
        }
        BridgeMessage::Event {
            event,
            page,
            level,
            text,
            error,
        } => match event.as_str() {
            "console" => events.push(format!(
                "[{}] {}",
                level.unwrap_or_else(|| "log".to_string()),
                text.unwrap_or_default()
            )),
            "pageclosed" => {
                if let Some(page) = page {
                    lock(&shared.closed_pages).insert(page);
                }
            }
            "disconnected" => shared.connected.store(false, Ordering::SeqCst),
            "fatal" => {
                let message = error.unwrap_or_else(|| "browser bridge failed".to_string());
                tracing::error!("Browser bridge: {}", message);
                *lock(&shared.fatal) = Some(message);
            }
            other => tracing::debug!("Unknown bridge event: {}", other),
        },
    }
}

// ============================================================================
// Driver Implementations
// ============================================================================

pub struct PlaywrightLauncher {
    config: BrowserConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, events: Arc<EventLog>) -> Result<Box<dyn Browser>> {
        let bridge = Arc::new(Bridge::spawn(&self.config, events).await?);
        if let Err(e) = bridge
            .request("launch", json!({ "headless": self.config.headless }))
            .await
        {
            bridge.shutdown().await;
            return Err(e);
        }
        tracing::info!("Launched headless browser");
        Ok(Box::new(PlaywrightBrowser { bridge }))
    }
}

struct PlaywrightBrowser {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Browser for PlaywrightBrowser {
    fn is_connected(&self) -> bool {
        self.bridge.is_connected()
    }

    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let result = self.bridge.request("newPage", json!({})).await?;
        let page_id = result
            .get("page")
            .and_then(Value::as_u64)
            .ok_or_else(|| MediaError::Browser("newPage returned no page id".to_string()))?;
        Ok(Box::new(PlaywrightPage {
            bridge: self.bridge.clone(),
            page_id,
        }))
    }

    async fn close(&self) -> Result<()> {
        let result = if self.bridge.is_connected() {
            self.bridge.request("close", json!({})).await.map(|_| ())
        } else {
            Ok(())
        };
        self.bridge.shutdown().await;
        result
    }
}

struct PlaywrightPage {
    bridge: Arc<Bridge>,
    page_id: u64,
}

#[async_trait]
impl Page for PlaywrightPage {
    fn is_closed(&self) -> bool {
        !self.bridge.is_connected() || lock(&self.bridge.shared.closed_pages).contains(&self.page_id)
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.bridge
            .request("goto", json!({ "page": self.page_id, "url": url }))
            .await
            .map(|_| ())
    }

    async fn title(&self) -> Result<String> {
        let result = self
            .bridge
            .request("title", json!({ "page": self.page_id }))
            .await?;
        Ok(result
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let result = self
            .bridge
            .request(
                "screenshot",
                json!({ "page": self.page_id, "fullPage": full_page }),
            )
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| MediaError::Browser("screenshot returned no data".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| MediaError::Browser(format!("invalid screenshot data: {}", e)))
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value> {
        let mut result = self
            .bridge
            .request(
                "evaluate",
                json!({ "page": self.page_id, "script": script, "arg": arg }),
            )
            .await?;
        Ok(result.get_mut("value").map(Value::take).unwrap_or(Value::Null))
    }
}
