//! Browser session manager
//!
//! [`BrowserSession`] owns at most one live browser and one page. The whole
//! state sits behind an async mutex that is held for the full duration of
//! each browser operation, so two callers (tools or browser-backed search
//! backends) never drive the same page at once.
//!
//! Reuse policy on every acquire:
//! - connected browser with an open page: reuse both
//! - connected browser whose page was closed: open a fresh page
//! - no browser, or a disconnected one: launch a fresh browser and page
//!
//! [`SessionManager`] adds the named screenshot table and releases the
//! backend registry when the session is closed.

pub mod driver;
pub mod log;
pub mod playwright;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backends::BackendRegistry;
use crate::error::{MediaError, Result};
use driver::{Browser, BrowserLauncher, Page};
use log::EventLog;

#[derive(Default)]
struct SessionState {
    browser: Option<Box<dyn Browser>>,
    page: Option<Box<dyn Page>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigateOutcome {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct Screenshot {
    pub name: String,
    pub png: Vec<u8>,
}

/// The one shared browser and page
pub struct BrowserSession {
    launcher: Arc<dyn BrowserLauncher>,
    events: Arc<EventLog>,
    state: Mutex<SessionState>,
}

impl BrowserSession {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, events: Arc<EventLog>) -> Self {
        Self {
            launcher,
            events,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Whether a browser is currently held (connected or not)
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.browser.is_some()
    }

    async fn acquire<'a>(&self, state: &'a mut SessionState) -> Result<&'a dyn Page> {
        let connected = state
            .browser
            .as_ref()
            .map(|browser| browser.is_connected())
            .unwrap_or(false);

        if !connected {
            if let Some(stale) = state.browser.take() {
                tracing::info!("Browser disconnected, relaunching");
                if let Err(e) = stale.close().await {
                    tracing::debug!("Closing stale browser: {}", e);
                }
            }
            state.page = None;
            state.browser = Some(self.launcher.launch(self.events.clone()).await?);
        }

        let page_open = state
            .page
            .as_ref()
            .map(|page| !page.is_closed())
            .unwrap_or(false);

        if !page_open {
            let browser = state
                .browser
                .as_ref()
                .ok_or_else(|| MediaError::Browser("browser is not running".to_string()))?;
            state.page = Some(browser.new_page().await?);
        }

        state
            .page
            .as_deref()
            .ok_or_else(|| MediaError::Browser("page is not open".to_string()))
    }

    pub async fn navigate(&self, url: &str) -> Result<NavigateOutcome> {
        let mut state = self.state.lock().await;
        let page = self.acquire(&mut state).await?;
        page.goto(url).await?;
        let title = page.title().await?;
        Ok(NavigateOutcome {
            url: url.to_string(),
            title,
        })
    }

    /// PNG of the current page
    pub async fn capture(&self, full_page: bool) -> Result<Vec<u8>> {
        let mut state = self.state.lock().await;
        let page = self.acquire(&mut state).await?;
        page.screenshot(full_page).await
    }

    /// Load `url` and run `script` against it, both under one lock
    pub async fn scrape(&self, url: &str, script: &str, arg: Value) -> Result<Value> {
        let mut state = self.state.lock().await;
        let page = self.acquire(&mut state).await?;
        page.goto(url).await?;
        page.evaluate(script, arg).await
    }

    /// Close the browser if one is held; returns whether one was
    pub async fn close(&self) -> Result<bool> {
        let browser = {
            let mut state = self.state.lock().await;
            state.page = None;
            state.browser.take()
        };

        match browser {
            Some(browser) => browser.close().await.map(|_| true),
            None => Ok(false),
        }
    }
}

pub struct SessionManager {
    browser: Arc<BrowserSession>,
    registry: Arc<BackendRegistry>,
    screenshots: StdMutex<HashMap<String, Vec<u8>>>,
}

impl SessionManager {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        registry: Arc<BackendRegistry>,
        events: Arc<EventLog>,
    ) -> Self {
        Self::with_browser(Arc::new(BrowserSession::new(launcher, events)), registry)
    }

    /// Manage a browser that backends in `registry` may share
    pub fn with_browser(browser: Arc<BrowserSession>, registry: Arc<BackendRegistry>) -> Self {
        Self {
            browser,
            registry,
            screenshots: StdMutex::new(HashMap::new()),
        }
    }

    pub fn browser(&self) -> &Arc<BrowserSession> {
        &self.browser
    }

    pub fn events(&self) -> &Arc<EventLog> {
        self.browser.events()
    }

    pub async fn is_active(&self) -> bool {
        self.browser.is_active().await
    }

    pub async fn navigate(&self, url: &str) -> Result<NavigateOutcome> {
        self.browser.navigate(url).await
    }

    /// Capture the current page and keep it under `name` (default `screenshot_<unix millis>`)
    pub async fn screenshot(&self, name: Option<String>, full_page: bool) -> Result<Screenshot> {
        let png = self.browser.capture(full_page).await?;

        let name = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("screenshot_{}", chrono::Utc::now().timestamp_millis()));
        self.lock_screenshots().insert(name.clone(), png.clone());
        Ok(Screenshot { name, png })
    }

    pub fn screenshot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_screenshots().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn screenshot_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.lock_screenshots().get(name).cloned()
    }

    pub fn console_logs(&self) -> Vec<String> {
        self.events().snapshot()
    }

    /// Tear down the browser and release backend resources
    ///
    /// Idempotent; returns whether a browser was actually open. Stored
    /// screenshots are dropped with the session.
    pub async fn close(&self) -> Result<bool> {
        let result = self.browser.close().await;
        self.lock_screenshots().clear();
        self.registry.close_all().await;
        result
    }

    fn lock_screenshots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.screenshots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory browser used by session and dispatcher tests

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    pub struct FakeStats {
        pub launches: AtomicUsize,
        pub pages: AtomicUsize,
        pub closes: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    type Flag = Arc<StdMutex<Option<Arc<AtomicBool>>>>;

    pub struct FakeLauncher {
        pub stats: Arc<FakeStats>,
        /// Connection flag of the most recently launched browser
        connected: Flag,
        /// Close flag of the most recently opened page
        page_closed: Flag,
        /// What `evaluate` returns on every page
        script_result: Arc<StdMutex<Value>>,
    }

    impl FakeLauncher {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                stats: Arc::new(FakeStats::default()),
                connected: Arc::new(StdMutex::new(None)),
                page_closed: Arc::new(StdMutex::new(None)),
                script_result: Arc::new(StdMutex::new(Value::Null)),
            })
        }

        pub fn set_script_result(&self, value: Value) {
            *self.script_result.lock().unwrap() = value;
        }

        pub fn disconnect(&self) {
            if let Some(flag) = self.connected.lock().unwrap().as_ref() {
                flag.store(false, Ordering::SeqCst);
            }
        }

        pub fn close_page(&self) {
            if let Some(flag) = self.page_closed.lock().unwrap().as_ref() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self, events: Arc<EventLog>) -> Result<Box<dyn Browser>> {
            self.stats.launches.fetch_add(1, Ordering::SeqCst);
            let connected = Arc::new(AtomicBool::new(true));
            *self.connected.lock().unwrap() = Some(connected.clone());
            Ok(Box::new(FakeBrowser {
                stats: self.stats.clone(),
                connected,
                events,
                page_closed: self.page_closed.clone(),
                script_result: self.script_result.clone(),
            }))
        }
    }

    struct FakeBrowser {
        stats: Arc<FakeStats>,
        connected: Arc<AtomicBool>,
        events: Arc<EventLog>,
        page_closed: Flag,
        script_result: Arc<StdMutex<Value>>,
    }

    #[async_trait]
    impl Browser for FakeBrowser {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn new_page(&self) -> Result<Box<dyn Page>> {
            self.stats.pages.fetch_add(1, Ordering::SeqCst);
            let closed = Arc::new(AtomicBool::new(false));
            *self.page_closed.lock().unwrap() = Some(closed.clone());
            Ok(Box::new(FakePage {
                stats: self.stats.clone(),
                closed,
                events: self.events.clone(),
                url: StdMutex::new(String::new()),
                script_result: self.script_result.clone(),
            }))
        }

        async fn close(&self) -> Result<()> {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakePage {
        stats: Arc<FakeStats>,
        closed: Arc<AtomicBool>,
        events: Arc<EventLog>,
        url: StdMutex<String>,
        script_result: Arc<StdMutex<Value>>,
    }

    #[async_trait]
    impl Page for FakePage {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn goto(&self, url: &str) -> Result<()> {
            let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

            if url.contains("fail") {
                return Err(MediaError::Browser(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)));
            }
            *self.url.lock().unwrap() = url.to_string();
            self.events.push(format!("[log] loaded {}", url));
            Ok(())
        }

        async fn title(&self) -> Result<String> {
            Ok(format!("Title of {}", self.url.lock().unwrap()))
        }

        async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>> {
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }

        async fn evaluate(&self, _script: &str, _arg: Value) -> Result<Value> {
            if self.url.lock().unwrap().is_empty() {
                return Err(MediaError::Browser("nothing loaded".to_string()));
            }
            Ok(self.script_result.lock().unwrap().clone())
        }
    }
}
