//! Configuration loading for media-scraper-mcp
//!
//! Configuration is loaded from:
//! 1. Environment variable MEDIA_SCRAPER_CONFIG_PATH
//! 2. ./media-scraper.toml
//! 3. <config dir>/media-scraper/config.toml
//! 4. Default values
//!
//! `SCRAPER_PORT` and `MEDIA_SCRAPER_STORAGE` override the file afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// HTTP front door
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL used when building links to stored files
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

/// Aggregated search behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results requested from each backend when the caller gives no limit
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Upper bound on a single backend call inside an aggregate search
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,
    /// Backends queried at once for one media type
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Default region policy (skip sources unreachable from restricted networks)
    #[serde(default = "default_true")]
    pub region_restricted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Per-hop timeout, body included
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Node.js binary used to host Playwright
    #[serde(default = "default_node_path")]
    pub node_path: String,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Timeout for a single browser command
    #[serde(default = "default_browser_timeout")]
    pub command_timeout_secs: u64,
}

/// External command line collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
    #[serde(default = "default_python_path")]
    pub python_path: String,
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    3100
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_max_results() -> usize {
    10
}

fn default_backend_timeout() -> u64 {
    15
}

fn default_max_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_download_timeout() -> u64 {
    60
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_node_path() -> String {
    "node".to_string()
}

fn default_browser_timeout() -> u64 {
    60
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_python_path() -> String {
    "python".to_string()
}

fn default_tool_timeout() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            backend_timeout_secs: default_backend_timeout(),
            max_concurrency: default_max_concurrency(),
            region_restricted: default_true(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            node_path: default_node_path(),
            headless: default_true(),
            command_timeout_secs: default_browser_timeout(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            python_path: default_python_path(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_path() {
            Some(path) => {
                tracing::info!("Loading config from: {}", path.display());
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Self::from_toml(&content)?
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid media-scraper configuration")
    }

    /// Apply `SCRAPER_PORT` / `MEDIA_SCRAPER_STORAGE` from the given lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("SCRAPER_PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid SCRAPER_PORT: {}", port),
            }
        }
        if let Some(root) = lookup("MEDIA_SCRAPER_STORAGE") {
            if !root.trim().is_empty() {
                self.storage.root = PathBuf::from(root);
            }
        }
    }

    /// Base URL for links handed back to HTTP callers
    pub fn public_base_url(&self) -> String {
        match &self.server.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.server.port),
        }
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MEDIA_SCRAPER_CONFIG_PATH") {
            return Some(PathBuf::from(path));
        }

        let local = PathBuf::from("media-scraper.toml");
        if local.exists() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|dir| dir.join("media-scraper").join("config.toml"))
            .filter(|path| path.exists())
    }
}
