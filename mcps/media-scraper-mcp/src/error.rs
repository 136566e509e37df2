//! Error types for media search, download, and browser automation

use thiserror::Error;

/// Failure of a single file download
///
/// Every variant is produced only after the partial file at the destination
/// has been removed.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status}: Failed to download {url}")]
    Status { status: u16, url: String },

    #[error("Download timeout: {0}")]
    Timeout(String),

    #[error("Too many redirects ({hops}) while downloading {url}")]
    TooManyRedirects { hops: usize, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by backends, the session manager, and the dispatcher
#[derive(Debug, Error)]
pub enum MediaError {
    /// External tool or site could not be reached or is not installed
    #[error("{0}")]
    BackendUnavailable(String),

    /// Missing or malformed arguments, rejected before any backend call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown tool: {0}")]
    UnknownOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Backend answered but the answer was unusable
    #[error("{0}")]
    Backend(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MediaError>;
