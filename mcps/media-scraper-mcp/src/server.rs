//! MCP Server implementation for media acquisition
//!
//! The tool router only describes the tools. Every `tools/call` goes straight
//! to [`Dispatcher::dispatch`], so unknown names and malformed arguments come
//! back as error envelopes instead of protocol errors. The same dispatcher
//! backs the HTTP front door.

use std::sync::Arc;

use anyhow::Result;
use mcp_common::{async_trait, EmbeddableMcp, McpError, ToolResponse};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    tool, tool_router, RoleServer,
};
use serde_json::Value;

use crate::aggregator::Aggregator;
use crate::backends::{ytdlp::YtDlp, BackendRegistry};
use crate::config::Config;
use crate::dispatcher::{
    Dispatcher, DownloadMediaParams, DownloadVideoParams, NavigateParams, ScreenshotParams,
    SearchMediaParams, ToolCall, VideoUrlParams,
};
use crate::downloader::Downloader;
use crate::session::log::EventLog;
use crate::session::playwright::PlaywrightLauncher;
use crate::session::{BrowserSession, SessionManager};
use crate::storage::Storage;

/// The main Media Scraper MCP Server
#[derive(Clone)]
pub struct MediaScraperMcpServer {
    dispatcher: Arc<Dispatcher>,
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Tool Router Implementation
// ============================================================================

#[tool_router]
impl MediaScraperMcpServer {
    /// Wire every component from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let ytdlp = Arc::new(YtDlp::new(&config.tools));
        let browser = Arc::new(BrowserSession::new(
            Arc::new(PlaywrightLauncher::new(config.browser.clone())),
            Arc::new(EventLog::default()),
        ));
        let registry = Arc::new(BackendRegistry::from_config(
            config,
            ytdlp.clone(),
            browser.clone(),
        )?);
        tracing::info!("Registered backends: {}", registry.names().join(", "));

        let session = Arc::new(SessionManager::with_browser(browser, registry.clone()));

        let dispatcher = Dispatcher::new(
            Aggregator::new(registry, &config.search),
            ytdlp,
            Downloader::new(&config.download)?,
            Storage::new(&config.storage.root),
            session,
            config.search.clone(),
        );
        Ok(Self::with_dispatcher(Arc::new(dispatcher)))
    }

    pub fn with_dispatcher(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    // ========================================================================
    // Search Tools
    // ========================================================================

    #[tool(
        description = "Search stock videos, music and images across several sources at once. \
                       Failed sources are listed in `errors` next to the results of the others."
    )]
    async fn search_media(
        &self,
        Parameters(params): Parameters<SearchMediaParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.dispatcher.execute(ToolCall::SearchMedia(params)).await.into())
    }

    // ========================================================================
    // Download Tools
    // ========================================================================

    #[tool(description = "Get metadata and available formats of a video page using yt-dlp.")]
    async fn get_video_info(
        &self,
        Parameters(params): Parameters<VideoUrlParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.dispatcher.execute(ToolCall::GetVideoInfo(params)).await.into())
    }

    #[tool(description = "Download a video (or only its audio) from YouTube, Bilibili and other sites using yt-dlp.")]
    async fn download_video(
        &self,
        Parameters(params): Parameters<DownloadVideoParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.dispatcher.execute(ToolCall::DownloadVideo(params)).await.into())
    }

    #[tool(description = "Download a file by direct URL into local storage (videos, images, music or svg).")]
    async fn download_media(
        &self,
        Parameters(params): Parameters<DownloadMediaParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.dispatcher.execute(ToolCall::DownloadMedia(params)).await.into())
    }

    // ========================================================================
    // Browser Tools
    // ========================================================================

    #[tool(description = "Open a URL in the shared headless browser and return the page title.")]
    async fn browser_navigate(
        &self,
        Parameters(params): Parameters<NavigateParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.dispatcher.execute(ToolCall::BrowserNavigate(params)).await.into())
    }

    #[tool(description = "Take a PNG screenshot of the current browser page.")]
    async fn browser_screenshot(
        &self,
        Parameters(params): Parameters<ScreenshotParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.dispatcher.execute(ToolCall::BrowserScreenshot(params)).await.into())
    }

    #[tool(description = "Close the headless browser and release scraper resources.")]
    async fn browser_close(&self) -> Result<CallToolResult, McpError> {
        Ok(self.dispatcher.execute(ToolCall::BrowserClose).await.into())
    }

    #[tool(description = "Return browser console output and tool activity captured during this session.")]
    async fn browser_console_logs(&self) -> Result<CallToolResult, McpError> {
        Ok(self.dispatcher.execute(ToolCall::BrowserConsoleLogs).await.into())
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

impl rmcp::ServerHandler for MediaScraperMcpServer {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tool_router.list_all()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request.arguments.map(Value::Object).unwrap_or(Value::Null);
        Ok(self.dispatcher.dispatch(&request.name, args).await.into())
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Media Scraper MCP Server - searches free stock media (Mixkit, Incompetech), \
                 video platforms (YouTube, Bilibili) and image engines (Bing, Baidu, DuckDuckGo), \
                 downloads files into local storage and drives a headless browser."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ============================================================================
// EmbeddableMcp Implementation
// ============================================================================

#[async_trait]
impl EmbeddableMcp for MediaScraperMcpServer {
    fn server_name(&self) -> &str {
        "media-scraper"
    }

    fn server_description(&self) -> Option<&str> {
        Some("Multi-source media search, resilient downloads, and a reusable browser session")
    }

    fn server_version(&self) -> Option<&str> {
        Some(env!("CARGO_PKG_VERSION"))
    }

    fn list_tools(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    async fn call_tool(&self, name: &str, params: Value) -> ToolResponse {
        self.dispatcher.dispatch(name, params).await
    }
}

#[cfg(test)]
mod tests {
    use rmcp::ServiceExt;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

    use super::*;
    use crate::dispatcher::tests::harness;

    fn server() -> (MediaScraperMcpServer, tempfile::TempDir) {
        let h = harness();
        (MediaScraperMcpServer::with_dispatcher(Arc::new(h.dispatcher)), h._dir)
    }

    #[test]
    fn test_every_tool_is_registered() {
        let (server, _dir) = server();
        let mut names: Vec<String> = server
            .list_tools()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();

        let mut expected: Vec<&str> = ToolCall::NAMES.to_vec();
        expected.sort();
        assert_eq!(names, expected);
        assert!(server.has_tool("search_media"));
    }

    #[tokio::test]
    async fn test_call_tool_goes_through_dispatcher() {
        let (server, _dir) = server();
        let response = server.call_tool("nope", json!({})).await;
        assert!(response.is_error);

        let response = server.call_tool("browser_close", json!({})).await;
        assert!(!response.is_error);
    }

    #[test]
    fn test_server_info() {
        let (server, _dir) = server();
        let info = rmcp::ServerHandler::get_info(&server);
        assert!(info.instructions.unwrap().contains("Media Scraper"));
        assert!(info.capabilities.tools.is_some());
    }

    struct StdioClient {
        writer: WriteHalf<DuplexStream>,
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    }

    impl StdioClient {
        async fn send(&mut self, message: Value) {
            let mut line = message.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn request(&mut self, id: u64, method: &str, params: Value) -> Value {
            self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
                .await;
            loop {
                let line = self.lines.next_line().await.unwrap().expect("server closed");
                let message: Value = serde_json::from_str(&line).unwrap();
                if message["id"] == json!(id) {
                    return message;
                }
            }
        }
    }

    async fn connect(server: MediaScraperMcpServer) -> StdioClient {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let service = server.serve(server_io).await.unwrap();
            let _ = service.waiting().await;
        });

        let (reader, writer) = tokio::io::split(client_io);
        let mut client = StdioClient {
            writer,
            lines: BufReader::new(reader).lines(),
        };
        let init = client
            .request(
                1,
                "initialize",
                json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "0.0.0"}
                }),
            )
            .await;
        assert!(init.get("result").is_some(), "initialize failed: {}", init);
        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        client
    }

    #[tokio::test]
    async fn test_stdio_failures_come_back_as_envelopes() {
        let (server, _dir) = server();
        let dispatcher = server.dispatcher().clone();
        let mut client = connect(server).await;

        let unknown = client
            .request(2, "tools/call", json!({"name": "make_coffee", "arguments": {}}))
            .await;
        assert!(unknown.get("error").is_none(), "protocol error: {}", unknown);
        assert_eq!(unknown["result"]["isError"], true);
        assert_eq!(unknown["result"]["content"][0]["text"], "Unknown tool: make_coffee");

        let missing = client
            .request(3, "tools/call", json!({"name": "search_media", "arguments": {"type": "video"}}))
            .await;
        assert!(missing.get("error").is_none(), "protocol error: {}", missing);
        assert_eq!(missing["result"]["isError"], true);

        let logs = dispatcher.session().console_logs().join("\n");
        assert!(logs.contains("[error] Tool make_coffee rejected"));
        assert!(logs.contains("[error] Tool search_media rejected"));
    }

    #[tokio::test]
    async fn test_stdio_lists_and_calls_tools() {
        let (server, _dir) = server();
        let mut client = connect(server).await;

        let listed = client.request(2, "tools/list", json!({})).await;
        let tools = listed["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), ToolCall::NAMES.len());

        let closed = client
            .request(3, "tools/call", json!({"name": "browser_close"}))
            .await;
        assert_eq!(closed["result"]["isError"], false);
        assert_eq!(closed["result"]["content"][0]["text"], "Browser and scrapers closed");
    }
}
