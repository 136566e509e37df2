//! DuckDuckGo image search
//!
//! Two requests: the HTML search page hands out a `vqd` token, then the
//! `i.js` endpoint returns image results as JSON.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::REFERER;
use reqwest::Client;
use serde::Deserialize;

use super::MediaBackend;
use crate::error::{MediaError, Result};
use crate::types::{MediaResult, MediaType, SearchOptions};

static VQD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"vqd=["']([^"']+)["']|vqd=([\d-]+)&"#).expect("Invalid vqd regex")
});

#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    results: Vec<ImageHit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageHit {
    title: String,
    image: String,
    thumbnail: String,
    url: String,
    width: u32,
    height: u32,
    source: String,
}

pub struct DuckDuckGoBackend {
    client: Client,
    base_url: String,
}

impl DuckDuckGoBackend {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, "https://duckduckgo.com")
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn token(&self, query: &str) -> Result<String> {
        let html = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        extract_vqd(&html)
            .ok_or_else(|| MediaError::Backend("DuckDuckGo did not return a search token".to_string()))
    }
}

pub(crate) fn extract_vqd(html: &str) -> Option<String> {
    let caps = VQD_RE.captures(html)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn parse_images(body: &str, max_results: usize, stamp: i64) -> Result<Vec<MediaResult>> {
    let page: ImagePage = serde_json::from_str(body)?;
    Ok(page
        .results
        .into_iter()
        .filter(|hit| !hit.image.is_empty())
        .take(max_results)
        .enumerate()
        .map(|(i, hit)| {
            let mut item = MediaResult::new(
                format!("duckduckgo_image_{}_{}", i, stamp),
                hit.title,
                hit.image,
                MediaType::Image,
                "duckduckgo",
            );
            item.detail_url = Some(hit.url).filter(|u| !u.is_empty());
            let thumbnail = Some(hit.thumbnail).filter(|t| !t.is_empty());
            item.preview_url = thumbnail.clone();
            item.thumbnail_url = thumbnail;
            item.width = Some(hit.width).filter(|w| *w > 0);
            item.height = Some(hit.height).filter(|h| *h > 0);
            item.license = Some("Unknown (check source)".to_string());
            item.author = Some(hit.source).filter(|s| !s.is_empty());
            item
        })
        .collect())
}

#[async_trait]
impl MediaBackend for DuckDuckGoBackend {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    fn supports(&self, media_type: MediaType) -> bool {
        media_type == MediaType::Image
    }

    async fn search(
        &self,
        query: &str,
        _media_type: MediaType,
        options: &SearchOptions,
    ) -> Result<Vec<MediaResult>> {
        let vqd = self.token(query).await?;
        let body = self
            .client
            .get(format!("{}/i.js", self.base_url))
            .query(&[
                ("l", "us-en"),
                ("o", "json"),
                ("q", query),
                ("vqd", vqd.as_str()),
                ("f", ",,,,,"),
                ("p", "1"),
            ])
            .header(REFERER, format!("{}/", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_images(&body, options.max_results, chrono::Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    use super::*;

    const IMAGES: &str = r#"{"results":[
        {"title":"Red fox","image":"https://img.example/fox.jpg","thumbnail":"https://tse.example/fox",
         "url":"https://example.org/fox","width":1920,"height":1080,"source":"Bing"},
        {"title":"broken","image":""},
        {"title":"Fox cub","image":"https://img.example/cub.jpg"}
    ]}"#;

    #[test]
    fn test_extract_vqd() {
        assert_eq!(extract_vqd(r#"...vqd="4-12345678",..."#).as_deref(), Some("4-12345678"));
        assert_eq!(extract_vqd("nrj('/d.js?q=x&vqd=4-999&p=1')").as_deref(), Some("4-999"));
        assert_eq!(extract_vqd("<html>nothing</html>"), None);
    }

    #[test]
    fn test_parse_images() {
        let results = parse_images(IMAGES, 10, 42).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "duckduckgo_image_0_42");
        assert_eq!(results[0].url, "https://img.example/fox.jpg");
        assert_eq!(results[0].detail_url.as_deref(), Some("https://example.org/fox"));
        assert_eq!(results[0].width, Some(1920));
        assert_eq!(results[0].author.as_deref(), Some("Bing"));
        assert_eq!(results[1].id, "duckduckgo_image_1_42");
        assert_eq!(results[1].width, None);
        assert_eq!(parse_images(IMAGES, 1, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_token_then_results() {
        let app = Router::new()
            .route("/", get(|| async { r#"<script>vqd="4-777";</script>"# }))
            .route(
                "/i.js",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    if params.get("vqd").map(String::as_str) == Some("4-777") {
                        (StatusCode::OK, IMAGES)
                    } else {
                        (StatusCode::FORBIDDEN, "")
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let backend = DuckDuckGoBackend::with_base_url(Client::new(), base);
        let results = backend
            .search("fox", MediaType::Image, &SearchOptions::with_max_results(5))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, "duckduckgo");
    }
}
