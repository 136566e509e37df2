//! Mixkit stock video and music
//!
//! Search pages embed `application/ld+json` blocks. Video pages carry
//! `VideoObject` nodes in `@graph`; music pages carry an `ItemList` of
//! `MusicRecording` entries with direct MP3 links.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use serde_json::Value;

use super::MediaBackend;
use crate::error::{MediaError, Result};
use crate::types::{MediaResult, MediaType, SearchOptions};

const LICENSE: &str = "Mixkit License (Free for commercial use)";

static JSON_LD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<script type="application/ld\+json"[^>]*>(.*?)</script>"#)
        .expect("Invalid JSON-LD regex")
});
static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d+)/#video$").expect("Invalid video id regex"));
static MUSIC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/music/(\d+)/").expect("Invalid music id regex"));
static ISO_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?").expect("Invalid duration regex")
});

pub struct MixkitBackend {
    client: Client,
    base_url: String,
}

impl MixkitBackend {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, "https://mixkit.co")
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Backend(format!("HTTP {}", status)));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl MediaBackend for MixkitBackend {
    fn name(&self) -> &str {
        "mixkit"
    }

    fn supports(&self, media_type: MediaType) -> bool {
        matches!(media_type, MediaType::Video | MediaType::Music)
    }

    async fn search(
        &self,
        query: &str,
        media_type: MediaType,
        options: &SearchOptions,
    ) -> Result<Vec<MediaResult>> {
        let slug = slug(query);
        match media_type {
            MediaType::Video => {
                let url = format!("{}/free-stock-video/{}/", self.base_url, slug);
                let html = self.fetch_page(&url).await?;
                Ok(parse_videos(&html, options.max_results))
            }
            MediaType::Music => {
                let url = format!("{}/free-stock-music/mood/{}/", self.base_url, slug);
                let html = self.fetch_page(&url).await?;
                Ok(parse_music(&html, options.max_results))
            }
            other => Err(MediaError::InvalidRequest(format!(
                "mixkit does not provide {}",
                other
            ))),
        }
    }
}

/// Whitespace collapsed to dashes, then percent-encoded as a path segment
fn slug(query: &str) -> String {
    let dashed = query.split_whitespace().collect::<Vec<_>>().join("-");
    url::form_urlencoded::byte_serialize(dashed.as_bytes()).collect()
}

/// Parsed JSON-LD blocks; malformed blocks are skipped
fn json_ld_blocks(html: &str) -> Vec<Value> {
    JSON_LD_RE
        .captures_iter(html)
        .filter_map(|caps| serde_json::from_str(caps.get(1)?.as_str().trim()).ok())
        .collect()
}

fn graph_nodes(block: &Value) -> &[Value] {
    block
        .get("@graph")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_field(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn parse_videos(html: &str, max_results: usize) -> Vec<MediaResult> {
    let mut results = Vec::new();
    for block in json_ld_blocks(html) {
        for node in graph_nodes(&block) {
            if results.len() >= max_results {
                return results;
            }
            if node.get("@type").and_then(Value::as_str) != Some("VideoObject") {
                continue;
            }
            let node_id = node.get("@id").and_then(Value::as_str).unwrap_or_default();
            let Some(id) = VIDEO_ID_RE.captures(node_id).and_then(|c| c.get(1)) else {
                continue;
            };
            let Some(content_url) = str_field(node, "contentUrl") else {
                continue;
            };

            let mut item = MediaResult::new(
                format!("mixkit_video_{}", id.as_str()),
                str_field(node, "name").unwrap_or_default(),
                content_url.clone(),
                MediaType::Video,
                "mixkit",
            );
            item.description = str_field(node, "description");
            item.detail_url = Some(node_id.replace("/#video", ""));
            item.preview_url = Some(str_field(node, "embedUrl").unwrap_or(content_url));
            item.thumbnail_url = str_field(node, "thumbnailUrl");
            item.license = Some(LICENSE.to_string());
            item.tags = node
                .get("videoQuality")
                .and_then(Value::as_array)
                .map(|qualities| {
                    qualities
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            results.push(item);
        }
    }
    results
}

pub(crate) fn parse_music(html: &str, max_results: usize) -> Vec<MediaResult> {
    let mut results = Vec::new();
    for block in json_ld_blocks(html) {
        let Some(list) = graph_nodes(&block).iter().find(|node| {
            node.get("@type").and_then(Value::as_str) == Some("ItemList")
                && node.get("itemListElement").is_some()
        }) else {
            continue;
        };
        let entries = list
            .get("itemListElement")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for entry in entries {
            if results.len() >= max_results {
                return results;
            }
            if entry.get("@type").and_then(Value::as_str) != Some("MusicRecording") {
                continue;
            }
            let Some(url) = str_field(entry, "url") else {
                continue;
            };
            let id = MUSIC_ID_RE
                .captures(&url)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .or_else(|| str_field(entry, "@id"))
                .unwrap_or_default();

            let mut item = MediaResult::new(
                format!("mixkit_music_{}", id),
                str_field(entry, "name").unwrap_or_default(),
                url.clone(),
                MediaType::Music,
                "mixkit",
            );
            item.preview_url = Some(url);
            item.duration = entry
                .get("duration")
                .and_then(Value::as_str)
                .and_then(parse_iso_duration);
            item.license = Some(LICENSE.to_string());
            item.author = str_field(entry, "byArtist");
            item.tags = str_field(entry, "genre").into_iter().collect();
            results.push(item);
        }
    }
    results
}

/// `PT2M20S` style durations in seconds
pub(crate) fn parse_iso_duration(value: &str) -> Option<u64> {
    let caps = ISO_DURATION_RE.captures(value)?;
    let part = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    Some(part(1) * 3600 + part(2) * 60 + part(3))
}
