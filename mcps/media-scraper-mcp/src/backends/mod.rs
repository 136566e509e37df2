//! Media backend adapters
//!
//! Every external media source sits behind [`MediaBackend`]. The registry is
//! built once at startup and keeps adapters in a fixed order; lookups are by
//! the source name callers use in `sources`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::Config;
use crate::error::Result;
use crate::session::BrowserSession;
use crate::types::{MediaResult, MediaType, SearchOptions};

pub mod bilibili;
pub mod duckduckgo;
pub mod icrawler;
pub mod incompetech;
pub mod mixkit;
pub mod pexels;
pub mod ytdlp;

/// Desktop browser user agent shared by the HTML/JSON scrapers
pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Uniform capability of one external media source
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Source identifier, also stamped on every result
    fn name(&self) -> &str;

    fn supports(&self, media_type: MediaType) -> bool;

    async fn search(
        &self,
        query: &str,
        media_type: MediaType,
        options: &SearchOptions,
    ) -> Result<Vec<MediaResult>>;

    /// Whether the backend's external dependency is present
    async fn is_available(&self) -> bool {
        true
    }

    /// Release cached state or external resources
    async fn close(&self) {}
}

/// Fixed set of backends, built once
pub struct BackendRegistry {
    backends: Vec<Arc<dyn MediaBackend>>,
}

impl BackendRegistry {
    pub fn new(backends: Vec<Arc<dyn MediaBackend>>) -> Self {
        Self { backends }
    }

    /// Every production adapter, wired from configuration
    ///
    /// `browser` is the session shared with the browser tools; Pexels
    /// searches run through it.
    pub fn from_config(
        config: &Config,
        ytdlp: Arc<ytdlp::YtDlp>,
        browser: Arc<BrowserSession>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(config.search.backend_timeout_secs.max(1) * 2))
            .build()?;

        let python = icrawler::IcrawlerConfig {
            python_path: config.tools.python_path.clone(),
            timeout: Duration::from_secs(config.tools.timeout_secs),
        };

        Ok(Self::new(vec![
            Arc::new(mixkit::MixkitBackend::new(client.clone())),
            Arc::new(ytdlp::YoutubeBackend::new(ytdlp)),
            Arc::new(bilibili::BilibiliBackend::new(client.clone())),
            Arc::new(incompetech::IncompetechBackend::new(client.clone())),
            Arc::new(icrawler::IcrawlerBackend::new(icrawler::Engine::Bing, python.clone())),
            Arc::new(icrawler::IcrawlerBackend::new(icrawler::Engine::Baidu, python)),
            Arc::new(duckduckgo::DuckDuckGoBackend::new(client)),
            Arc::new(pexels::PexelsBackend::new(browser)),
        ]))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MediaBackend>> {
        self.backends
            .iter()
            .find(|backend| backend.name() == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    pub async fn close_all(&self) {
        for backend in &self.backends {
            backend.close().await;
        }
    }
}

/// Parse `SS`, `MM:SS` or `HH:MM:SS` into seconds
pub(crate) fn parse_clock_duration(value: &str) -> Option<u64> {
    let parts: Vec<u64> = value
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;

    match parts.as_slice() {
        [s] => Some(*s),
        [m, s] => Some(m * 60 + s),
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{FakeBackend, Script};
    use super::*;

    #[test]
    fn test_clock_duration() {
        assert_eq!(parse_clock_duration("45"), Some(45));
        assert_eq!(parse_clock_duration("24:21"), Some(1461));
        assert_eq!(parse_clock_duration("1:30:00"), Some(5400));
        assert_eq!(parse_clock_duration("abc"), None);
        assert_eq!(parse_clock_duration("1:2:3:4"), None);
    }

    #[tokio::test]
    async fn test_registry_lookup_order_and_close() {
        let a = Arc::new(FakeBackend::new("a", vec![MediaType::Video], Script::Items(1)));
        let b = Arc::new(FakeBackend::new("b", vec![MediaType::Music], Script::Items(1)));
        let registry = BackendRegistry::new(vec![a.clone(), b.clone()]);

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("b").is_some());
        assert!(registry.get("c").is_none());

        registry.close_all().await;
        assert_eq!(a.closes.load(Ordering::SeqCst), 1);
        assert_eq!(b.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_production_registry_names() {
        let config = Config::default();
        let ytdlp = Arc::new(ytdlp::YtDlp::new(&config.tools));
        let browser = Arc::new(BrowserSession::new(
            crate::session::testing::FakeLauncher::new(),
            Arc::new(crate::session::log::EventLog::default()),
        ));
        let registry = BackendRegistry::from_config(&config, ytdlp, browser).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "mixkit",
                "youtube",
                "bilibili",
                "incompetech",
                "bing",
                "baidu",
                "duckduckgo",
                "pexels"
            ]
        );
    }
}
