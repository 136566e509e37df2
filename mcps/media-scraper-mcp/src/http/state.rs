//! Shared application state

use std::path::Path;
use std::sync::Arc;

use crate::dispatcher::Dispatcher;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Same dispatcher the MCP transport uses
    pub dispatcher: Arc<Dispatcher>,
    /// Port reported by `/api/status`
    pub port: u16,
    /// Base for `localUrl` links, without trailing slash
    pub public_url: String,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, port: u16, public_url: impl Into<String>) -> Self {
        Self {
            dispatcher,
            port,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Public URL of a file inside the storage root, if it is inside it
    pub fn local_url(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(self.dispatcher.storage().root()).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| {
                url::form_urlencoded::byte_serialize(c.as_os_str().to_string_lossy().as_bytes())
                    .collect::<String>()
                    .replace('+', "%20")
            })
            .collect();
        Some(format!("{}/storage/{}", self.public_url, segments.join("/")))
    }
}
