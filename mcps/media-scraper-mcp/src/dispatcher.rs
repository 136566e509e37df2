//! Name-keyed tool router
//!
//! `dispatch` is the only place failures are allowed to stop: argument
//! errors, backend errors, and panics all come back as error envelopes, and
//! every call leaves one line in the session event log.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;
use mcp_common::ToolResponse;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::aggregator::{Aggregator, SearchRequest};
use crate::backends::ytdlp::{DownloadRequest, VideoDownload, VideoInfo, YtDlp};
use crate::config::SearchConfig;
use crate::downloader::Downloader;
use crate::error::{MediaError, Result};
use crate::session::log::EventLog;
use crate::session::SessionManager;
use crate::storage::Storage;
use crate::types::{AggregatedSearchResult, DownloadKind, SearchScope};

// ============================================================================
// Parameter Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchMediaParams {
    #[schemars(description = "Search keywords")]
    pub query: String,
    #[serde(default, rename = "type")]
    #[schemars(description = "Media type to search: video, music, image or all (default: all)")]
    pub scope: SearchScope,
    #[schemars(description = "Backends to query, e.g. [\"mixkit\", \"bing\"]; defaults depend on the region policy")]
    pub sources: Option<Vec<String>>,
    #[schemars(description = "Maximum results per backend (default: 10)")]
    pub max_results: Option<usize>,
    #[serde(alias = "chinaMainlandOnly")]
    #[schemars(description = "Only use backends reachable from restricted networks (default: true)")]
    pub region_policy: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoUrlParams {
    #[schemars(description = "Video page URL (YouTube, Bilibili, TikTok, ...)")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadVideoParams {
    #[schemars(description = "Video page URL")]
    pub url: String,
    #[schemars(description = "best, 1080p, 720p, 480p or a raw yt-dlp format selector (default: best)")]
    pub format: Option<String>,
    #[schemars(description = "Extract the audio track as mp3")]
    pub audio_only: Option<bool>,
    #[schemars(description = "Directory to write into (default: storage/videos, storage/music for audio)")]
    pub output_dir: Option<String>,
    #[schemars(description = "Output file name template")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DownloadMediaParams {
    #[schemars(description = "Direct URL of the file")]
    pub url: String,
    #[serde(rename = "type")]
    #[schemars(description = "video, image, music or svg; decides the storage directory")]
    pub kind: DownloadKind,
    #[schemars(description = "Base file name without directories (default: <type>_<timestamp>)")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NavigateParams {
    #[schemars(description = "URL to open in the headless browser")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotParams {
    #[schemars(description = "Name to store the screenshot under (default: screenshot_<timestamp>)")]
    pub name: Option<String>,
    #[schemars(description = "Capture the full scrollable page")]
    pub full_page: Option<bool>,
}

/// A validated tool invocation
#[derive(Debug, Clone)]
pub enum ToolCall {
    SearchMedia(SearchMediaParams),
    GetVideoInfo(VideoUrlParams),
    DownloadVideo(DownloadVideoParams),
    DownloadMedia(DownloadMediaParams),
    BrowserNavigate(NavigateParams),
    BrowserScreenshot(ScreenshotParams),
    BrowserClose,
    BrowserConsoleLogs,
}

impl ToolCall {
    pub const NAMES: [&'static str; 8] = [
        "search_media",
        "get_video_info",
        "download_video",
        "download_media",
        "browser_navigate",
        "browser_screenshot",
        "browser_close",
        "browser_console_logs",
    ];

    /// Validate raw arguments for a named tool
    pub fn parse(name: &str, args: Value) -> Result<Self> {
        let args = match args {
            Value::Null => json!({}),
            other => other,
        };
        let call = match name {
            "search_media" => Self::SearchMedia(from_args(args)?),
            "get_video_info" => Self::GetVideoInfo(from_args(args)?),
            "download_video" => Self::DownloadVideo(from_args(args)?),
            "download_media" => Self::DownloadMedia(from_args(args)?),
            "browser_navigate" => Self::BrowserNavigate(from_args(args)?),
            "browser_screenshot" => Self::BrowserScreenshot(from_args(args)?),
            "browser_close" => Self::BrowserClose,
            "browser_console_logs" => Self::BrowserConsoleLogs,
            other => return Err(MediaError::UnknownOperation(other.to_string())),
        };
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchMedia(_) => "search_media",
            Self::GetVideoInfo(_) => "get_video_info",
            Self::DownloadVideo(_) => "download_video",
            Self::DownloadMedia(_) => "download_media",
            Self::BrowserNavigate(_) => "browser_navigate",
            Self::BrowserScreenshot(_) => "browser_screenshot",
            Self::BrowserClose => "browser_close",
            Self::BrowserConsoleLogs => "browser_console_logs",
        }
    }
}

fn from_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| MediaError::InvalidRequest(e.to_string()))
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(MediaError::InvalidRequest(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

/// Result of a generic download
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedMedia {
    pub local_path: PathBuf,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: DownloadKind,
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Dispatcher {
    aggregator: Aggregator,
    ytdlp: Arc<YtDlp>,
    downloader: Downloader,
    storage: Storage,
    session: Arc<SessionManager>,
    search: SearchConfig,
}

impl Dispatcher {
    pub fn new(
        aggregator: Aggregator,
        ytdlp: Arc<YtDlp>,
        downloader: Downloader,
        storage: Storage,
        session: Arc<SessionManager>,
        search: SearchConfig,
    ) -> Self {
        Self {
            aggregator,
            ytdlp,
            downloader,
            storage,
            session,
            search,
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn ytdlp(&self) -> &Arc<YtDlp> {
        &self.ytdlp
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn events(&self) -> &Arc<EventLog> {
        self.session.events()
    }

    /// Route a raw tool call; never fails
    pub async fn dispatch(&self, name: &str, args: Value) -> ToolResponse {
        match ToolCall::parse(name, args) {
            Ok(call) => self.execute(call).await,
            Err(e) => {
                tracing::warn!("Rejected call to {}: {}", name, e);
                self.events()
                    .push(format!("[error] Tool {} rejected: {}", name, e));
                ToolResponse::error(e.to_string())
            }
        }
    }

    /// Run a validated call, converting errors and panics into envelopes
    pub async fn execute(&self, call: ToolCall) -> ToolResponse {
        let name = call.name();
        tracing::info!("Calling tool {}", name);

        let outcome = AssertUnwindSafe(self.run(call)).catch_unwind().await;
        match outcome {
            Ok(Ok(response)) => {
                self.events().push(format!("[info] Tool {} completed", name));
                response
            }
            Ok(Err(e)) => {
                tracing::error!("Tool {} failed: {}", name, e);
                self.events()
                    .push(format!("[error] Tool {} failed: {}", name, e));
                ToolResponse::error(failure_message(name, &e))
            }
            Err(_) => {
                tracing::error!("Tool {} panicked", name);
                self.events().push(format!("[error] Tool {} panicked", name));
                ToolResponse::error("Tool execution failed: internal error")
            }
        }
    }

    async fn run(&self, call: ToolCall) -> Result<ToolResponse> {
        match call {
            ToolCall::SearchMedia(params) => {
                let result = self.search_media(&params).await?;
                Ok(ToolResponse::json(&result))
            }
            ToolCall::GetVideoInfo(params) => {
                let info = self.video_info(&params.url).await?;
                Ok(ToolResponse::json(&json!({ "status": "success", "info": info })))
            }
            ToolCall::DownloadVideo(params) => {
                let result = self.download_video(&params).await?;
                Ok(ToolResponse::json(&json!({ "status": "success", "result": result })))
            }
            ToolCall::DownloadMedia(params) => {
                let media = self.download_media(&params).await?;
                self.events().push(format!(
                    "[info] Media downloaded: {}",
                    media.local_path.display()
                ));
                Ok(ToolResponse::json(&json!({
                    "status": "success",
                    "localPath": media.local_path,
                    "sizeBytes": media.size,
                    "size": media.size,
                    "type": media.kind,
                })))
            }
            ToolCall::BrowserNavigate(params) => {
                require(&params.url, "url")?;
                let outcome = self.session.navigate(&params.url).await?;
                Ok(ToolResponse::json(&json!({
                    "status": "success",
                    "url": outcome.url,
                    "title": outcome.title,
                })))
            }
            ToolCall::BrowserScreenshot(params) => {
                let shot = self
                    .session
                    .screenshot(params.name, params.full_page.unwrap_or(false))
                    .await?;
                let mut response = ToolResponse::image(&shot.png, "image/png");
                response.content.push(mcp_common::ContentBlock::Text {
                    text: format!("Screenshot '{}' captured", shot.name),
                });
                Ok(response)
            }
            ToolCall::BrowserClose => {
                self.session.close().await?;
                Ok(ToolResponse::text("Browser and scrapers closed"))
            }
            ToolCall::BrowserConsoleLogs => {
                let logs = self.session.console_logs();
                if logs.is_empty() {
                    Ok(ToolResponse::text("No console output captured"))
                } else {
                    Ok(ToolResponse::text(logs.join("\n")))
                }
            }
        }
    }

    // ========================================================================
    // Typed operations shared with the HTTP front door
    // ========================================================================

    pub async fn search_media(&self, params: &SearchMediaParams) -> Result<AggregatedSearchResult> {
        let request = SearchRequest {
            query: params.query.clone(),
            scope: params.scope,
            sources: params.sources.clone(),
            max_results: params.max_results.unwrap_or(self.search.max_results),
            region_restricted: params.region_policy.unwrap_or(self.search.region_restricted),
        };
        self.aggregator.search(&request).await
    }

    pub async fn video_info(&self, url: &str) -> Result<VideoInfo> {
        require(url, "url")?;
        self.ytdlp.ensure_available().await?;
        self.ytdlp.video_info(url).await
    }

    pub async fn download_video(&self, params: &DownloadVideoParams) -> Result<VideoDownload> {
        require(&params.url, "url")?;
        self.ytdlp.ensure_available().await?;

        let audio_only = params.audio_only.unwrap_or(false);
        let output_dir = match &params.output_dir {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ if audio_only => self.storage.dir_for(DownloadKind::Music),
            _ => self.storage.dir_for(DownloadKind::Video),
        };

        self.ytdlp
            .download(&DownloadRequest {
                url: params.url.clone(),
                output_dir,
                format: params.format.clone(),
                audio_only,
                filename: params.filename.clone(),
            })
            .await
    }

    pub async fn download_media(&self, params: &DownloadMediaParams) -> Result<DownloadedMedia> {
        require(&params.url, "url")?;
        let url = Url::parse(&params.url)
            .map_err(|e| MediaError::InvalidRequest(format!("Invalid URL {}: {}", params.url, e)))?;

        let dest = self
            .storage
            .resolve_download_path(&url, params.kind, params.filename.as_deref())?;
        tokio::fs::create_dir_all(self.storage.dir_for(params.kind)).await?;

        let outcome = self.downloader.download(url.as_str(), &dest).await?;
        let filename = dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(DownloadedMedia {
            local_path: outcome.local_path,
            filename,
            size: outcome.size_bytes,
            kind: params.kind,
        })
    }
}

/// Envelope text for a failed call
fn failure_message(tool: &str, error: &MediaError) -> String {
    match error {
        MediaError::InvalidRequest(_)
        | MediaError::UnknownOperation(_)
        | MediaError::BackendUnavailable(_) => error.to_string(),
        _ if tool == "download_media" => format!("Failed to download media: {}", error),
        _ => format!("Tool execution failed: {}", error),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use mcp_common::ContentBlock;

    use super::*;
    use crate::backends::testing::{FakeBackend, Script};
    use crate::backends::{BackendRegistry, MediaBackend};
    use crate::config::ToolsConfig;
    use crate::session::testing::FakeLauncher;
    use crate::types::MediaType;

    pub(crate) struct Harness {
        pub dispatcher: Dispatcher,
        pub launcher: Arc<FakeLauncher>,
        pub _dir: tempfile::TempDir,
    }

    pub(crate) fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let backends: Vec<Arc<dyn MediaBackend>> = vec![
            Arc::new(FakeBackend::new(
                "mixkit",
                vec![MediaType::Video, MediaType::Music],
                Script::Items(3),
            )),
            Arc::new(FakeBackend::new("bilibili", vec![MediaType::Video], Script::Fail("HTTP 412"))),
        ];
        let registry = Arc::new(BackendRegistry::new(backends));
        let launcher = FakeLauncher::new();
        let session = Arc::new(SessionManager::new(
            launcher.clone(),
            registry.clone(),
            Arc::new(EventLog::default()),
        ));
        let ytdlp = Arc::new(YtDlp::new(&ToolsConfig {
            ytdlp_path: "/nonexistent/yt-dlp-binary".to_string(),
            ..ToolsConfig::default()
        }));

        let dispatcher = Dispatcher::new(
            Aggregator::with_limits(registry, Duration::from_secs(2), 4),
            ytdlp,
            Downloader::with_limits(Duration::from_secs(5), 10, "test-agent").unwrap(),
            Storage::new(dir.path().join("storage")),
            session,
            SearchConfig::default(),
        );
        Harness {
            dispatcher,
            launcher,
            _dir: dir,
        }
    }

    fn text(response: &ToolResponse) -> &str {
        response.first_text().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let h = harness();
        let response = h.dispatcher.dispatch("make_coffee", json!({})).await;
        assert!(response.is_error);
        assert_eq!(text(&response), "Unknown tool: make_coffee");
        assert_eq!(h.dispatcher.session().console_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_query_rejected() {
        let h = harness();
        let response = h.dispatcher.dispatch("search_media", json!({"type": "video"})).await;
        assert!(response.is_error);
        assert!(text(&response).contains("query"));
    }

    #[tokio::test]
    async fn test_search_media_with_alias_and_partial_failure() {
        let h = harness();
        let response = h
            .dispatcher
            .dispatch(
                "search_media",
                json!({"query": "forest", "type": "video", "maxResults": 5, "chinaMainlandOnly": true}),
            )
            .await;
        assert!(!response.is_error);

        let value: Value = response.parse_json().unwrap();
        assert_eq!(value["counts"]["videos"], 3);
        assert_eq!(value["regionPolicy"], true);
        assert_eq!(value["errors"], json!(["bilibili video: HTTP 412"]));
    }

    #[tokio::test]
    async fn test_single_source_example() {
        let h = harness();
        let response = h
            .dispatcher
            .dispatch(
                "search_media",
                json!({"query": "forest", "type": "video", "sources": ["mixkit"], "maxResults": 5}),
            )
            .await;
        let value: Value = response.parse_json().unwrap();
        assert_eq!(value["results"]["videos"].as_array().unwrap().len(), 3);
        assert_eq!(value["counts"]["total"], 3);
        assert!(value.get("errors").is_none());
    }

    #[tokio::test]
    async fn test_browser_close_without_session() {
        let h = harness();
        let response = h.dispatcher.dispatch("browser_close", Value::Null).await;
        assert!(!response.is_error);
        assert_eq!(text(&response), "Browser and scrapers closed");
    }

    #[tokio::test]
    async fn test_browser_flow() {
        let h = harness();

        let response = h
            .dispatcher
            .dispatch("browser_navigate", json!({"url": "https://example.org"}))
            .await;
        let value: Value = response.parse_json().unwrap();
        assert_eq!(value["title"], "Title of https://example.org");

        let response = h
            .dispatcher
            .dispatch("browser_screenshot", json!({"name": "home", "fullPage": true}))
            .await;
        assert!(!response.is_error);
        assert!(matches!(
            &response.content[0],
            ContentBlock::Image { mime_type, .. } if mime_type == "image/png"
        ));
        assert_eq!(h.dispatcher.session().screenshot_names(), vec!["home"]);

        let logs = h.dispatcher.dispatch("browser_console_logs", json!({})).await;
        assert!(text(&logs).contains("[log] loaded https://example.org"));
        assert!(text(&logs).contains("[info] Tool browser_screenshot completed"));

        h.dispatcher.dispatch("browser_close", json!({})).await;
        assert!(h.dispatcher.session().screenshot_names().is_empty());
        assert_eq!(
            h.launcher.stats.closes.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_navigation_failure_is_enveloped() {
        let h = harness();
        let response = h
            .dispatcher
            .dispatch("browser_navigate", json!({"url": "https://fail.example"}))
            .await;
        assert!(response.is_error);
        assert!(text(&response).starts_with("Tool execution failed: Browser error"));
        let logs = h.dispatcher.session().console_logs();
        assert!(logs.iter().any(|line| line.starts_with("[error] Tool browser_navigate failed")));
    }

    #[tokio::test]
    async fn test_ytdlp_missing() {
        let h = harness();
        let response = h
            .dispatcher
            .dispatch("get_video_info", json!({"url": "https://youtu.be/abc"}))
            .await;
        assert!(response.is_error);
        assert_eq!(
            text(&response),
            "yt-dlp is not installed. Please install it with: pip install yt-dlp"
        );
    }

    #[tokio::test]
    async fn test_download_media_404_leaves_nothing() {
        let h = harness();
        let app = Router::new().route("/a.mp4", get(|| async { (StatusCode::NOT_FOUND, "gone") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/a.mp4", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let response = h
            .dispatcher
            .dispatch("download_media", json!({"url": url, "type": "video"}))
            .await;
        assert!(response.is_error);
        assert!(text(&response).starts_with("Failed to download media: HTTP 404"));

        let videos = h.dispatcher.storage().dir_for(DownloadKind::Video);
        assert_eq!(std::fs::read_dir(videos).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_media_success() {
        let h = harness();
        let app = Router::new().route("/pics/cat.png", get(|| async { "png-bytes" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/pics/cat.png", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let response = h
            .dispatcher
            .dispatch("download_media", json!({"url": url, "type": "image", "filename": "kitty"}))
            .await;
        let value: Value = response.parse_json().unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["sizeBytes"], 9);
        assert_eq!(value["size"], 9);
        assert_eq!(value["type"], "image");
        assert!(value["localPath"].as_str().unwrap().ends_with("images/kitty.png"));
    }

    #[tokio::test]
    async fn test_download_media_rejects_traversal() {
        let h = harness();
        let response = h
            .dispatcher
            .dispatch(
                "download_media",
                json!({"url": "https://example.org/a.mp4", "type": "video", "filename": "../evil"}),
            )
            .await;
        assert!(response.is_error);
        assert!(text(&response).starts_with("Invalid request: Invalid filename"));
    }
}
