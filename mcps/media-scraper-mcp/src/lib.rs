//! Media Scraper MCP Library
//!
//! Media acquisition orchestration: one request fans out to independent
//! backends (stock media sites, yt-dlp, image search engines), results are
//! normalized into [`types::MediaResult`], and any single backend may fail
//! without failing the request.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use media_scraper_mcp::{config::Config, MediaScraperMcpServer};
//! use mcp_common::EmbeddableMcp;
//!
//! let server = MediaScraperMcpServer::new(&Config::load()?)?;
//! let response = server
//!     .call_tool("search_media", serde_json::json!({ "query": "forest", "type": "video" }))
//!     .await;
//! ```
//!
//! # Configuration
//! `media-scraper.toml` in the working directory, or
//! `~/.config/media-scraper/config.toml`; see [`config::Config`].

pub mod aggregator;
pub mod backends;
pub mod config;
pub mod dispatcher;
pub mod downloader;
pub mod error;
pub mod http;
pub mod server;
pub mod session;
pub mod storage;
pub mod types;

// Re-export main server type
pub use server::MediaScraperMcpServer;

// Re-export parameter types for direct API usage
pub use dispatcher::{
    DownloadMediaParams, DownloadVideoParams, NavigateParams, ScreenshotParams,
    SearchMediaParams, VideoUrlParams,
};
pub use error::{DownloadError, MediaError};
