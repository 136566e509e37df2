//! Browser driver seams
//!
//! The session manager only talks to these traits. Production uses the
//! Playwright bridge; tests plug in in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::log::EventLog;
use crate::error::Result;

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a new browser. Console output of its pages goes to `events`.
    async fn launch(&self, events: Arc<EventLog>) -> Result<Box<dyn Browser>>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn new_page(&self) -> Result<Box<dyn Page>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Page: Send + Sync {
    fn is_closed(&self) -> bool;

    /// Navigate and wait for the network to settle
    async fn goto(&self, url: &str) -> Result<()>;

    async fn title(&self) -> Result<String>;

    /// PNG bytes
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;

    /// Call the JS function expression `script` in the page with `arg`
    ///
    /// The function may be async; its JSON-serializable return value comes back.
    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value>;
}
