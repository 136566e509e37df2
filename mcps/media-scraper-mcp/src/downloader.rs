//! Streaming file downloader
//!
//! Redirects are followed manually so the hop count is explicit state and
//! every hop gets its own timeout window. The timeout bounds the wait for
//! response headers and then each gap between body chunks, so a slow but
//! steady transfer is never cut off. The body is streamed straight to the
//! destination; whatever goes wrong, the destination is removed before the
//! error is returned.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, LOCATION, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::types::DownloadOutcome;

/// Outcome of one request in a redirect chain
enum Hop {
    Done(u64),
    Redirect(Url),
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    timeout: Duration,
    max_redirects: usize,
    user_agent: String,
}

impl Downloader {
    pub fn new(config: &DownloadConfig) -> Result<Self, DownloadError> {
        Self::with_limits(
            Duration::from_secs(config.timeout_secs),
            config.max_redirects,
            config.user_agent.clone(),
        )
    }

    pub fn with_limits(
        timeout: Duration,
        max_redirects: usize,
        user_agent: impl Into<String>,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            timeout,
            max_redirects,
            user_agent: user_agent.into(),
        })
    }

    /// Fetch `url` into `dest`, following at most `max_redirects` redirects
    pub async fn download(&self, url: &str, dest: &Path) -> Result<DownloadOutcome, DownloadError> {
        let mut current = Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", url, e)))?;
        let mut hops = 0usize;

        loop {
            match self.attempt(&current, dest).await {
                Ok(Hop::Done(size_bytes)) => {
                    tracing::info!(url = %current, hops, size_bytes, "Download complete");
                    return Ok(DownloadOutcome {
                        local_path: dest.to_path_buf(),
                        size_bytes,
                    });
                }
                Ok(Hop::Redirect(next)) => {
                    hops += 1;
                    if hops > self.max_redirects {
                        remove_partial(dest).await;
                        return Err(DownloadError::TooManyRedirects {
                            hops,
                            url: url.to_string(),
                        });
                    }
                    tracing::debug!(from = %current, to = %next, hops, "Following redirect");
                    current = next;
                }
                Err(e) => {
                    remove_partial(dest).await;
                    tracing::warn!(url = %current, error = %e, "Download failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, url: &Url, dest: &Path) -> Result<Hop, DownloadError> {
        let request = self
            .client
            .get(url.clone())
            .headers(browser_headers(url, &self.user_agent))
            .send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(response) => response?,
            Err(_) => return Err(DownloadError::Timeout(url.to_string())),
        };

        let status = response.status();
        if status.is_redirection() {
            if let Some(location) = response.headers().get(LOCATION) {
                let location = location
                    .to_str()
                    .map_err(|e| DownloadError::InvalidUrl(format!("redirect location: {}", e)))?;
                let next = url
                    .join(location)
                    .map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", location, e)))?;
                remove_partial(dest).await;
                return Ok(Hop::Redirect(next));
            }
        }

        if status != StatusCode::OK {
            return Err(DownloadError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        loop {
            let chunk = match tokio::time::timeout(self.timeout, body.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break,
                Err(_) => return Err(DownloadError::Timeout(url.to_string())),
            };
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let size = tokio::fs::metadata(dest).await?.len();
        Ok(Hop::Done(size))
    }
}

/// Header set of a desktop browser, with the target's origin as referer
///
/// The referer is `scheme://host/` without the port, which is what the hosted
/// UI has always sent.
fn browser_headers(url: &Url, user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    if let Some(host) = url.host_str() {
        if let Ok(value) = HeaderValue::from_str(&format!("{}://{}/", url.scheme(), host)) {
            headers.insert(REFERER, value);
        }
    }
    headers
}

async fn remove_partial(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => tracing::debug!(path = %dest.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dest.display(), error = %e, "Failed to remove partial file"),
    }
}
