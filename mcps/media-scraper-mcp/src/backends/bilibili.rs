//! Bilibili video search via the public web-interface API

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, ORIGIN, REFERER};
use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

use super::{parse_clock_duration, MediaBackend};
use crate::error::{MediaError, Result};
use crate::types::{MediaResult, MediaType, SearchOptions};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("Invalid tag regex"));

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<SearchData>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchData {
    #[serde(default)]
    result: Vec<VideoHit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoHit {
    bvid: Option<String>,
    aid: Option<u64>,
    title: String,
    description: Option<String>,
    duration: Option<String>,
    pic: Option<String>,
    author: Option<String>,
    play: Option<u64>,
    arcurl: Option<String>,
}

impl VideoHit {
    fn into_result(self) -> Option<MediaResult> {
        let key = self
            .bvid
            .clone()
            .filter(|b| !b.is_empty())
            .or_else(|| self.aid.map(|aid| aid.to_string()))?;

        let url = match &self.bvid {
            Some(bvid) if !bvid.is_empty() => format!("https://www.bilibili.com/video/{}", bvid),
            _ => self
                .arcurl
                .clone()
                .unwrap_or_else(|| format!("https://www.bilibili.com/video/av{}", key)),
        };

        let mut item = MediaResult::new(
            format!("bilibili_{}", key),
            TAG_RE.replace_all(&self.title, "").into_owned(),
            url.clone(),
            MediaType::Video,
            "bilibili",
        );
        item.description = self.description.filter(|d| !d.is_empty());
        item.detail_url = Some(url);
        item.duration = self.duration.as_deref().and_then(parse_clock_duration);
        item.thumbnail_url = self.pic.map(|pic| {
            if pic.starts_with("//") {
                format!("https:{}", pic)
            } else {
                pic
            }
        });
        item.author = self.author.filter(|a| !a.is_empty());
        if let Some(play) = self.play {
            item.tags.push(format!("plays:{}", play));
        }
        Some(item)
    }
}

pub struct BilibiliBackend {
    client: Client,
    endpoint: String,
}

impl BilibiliBackend {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, "https://api.bilibili.com/x/web-interface/search/type")
    }

    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

/// Anonymous device cookie the search API expects
fn buvid_cookie() -> String {
    let seed = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let id: String = seed.chars().take(35).collect::<String>().to_uppercase();
    format!("buvid3={}infoc", id)
}

fn parse_response(body: &str, max_results: usize) -> Result<Vec<MediaResult>> {
    let envelope: SearchEnvelope = serde_json::from_str(body)?;
    if envelope.code != 0 {
        return Err(MediaError::Backend(format!(
            "Bilibili API error {}: {}",
            envelope.code, envelope.message
        )));
    }
    Ok(envelope
        .data
        .unwrap_or_default()
        .result
        .into_iter()
        .filter_map(VideoHit::into_result)
        .take(max_results)
        .collect())
}

#[async_trait]
impl MediaBackend for BilibiliBackend {
    fn name(&self) -> &str {
        "bilibili"
    }

    fn supports(&self, media_type: MediaType) -> bool {
        media_type == MediaType::Video
    }

    async fn search(
        &self,
        query: &str,
        _media_type: MediaType,
        options: &SearchOptions,
    ) -> Result<Vec<MediaResult>> {
        let page_size = options.max_results.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("search_type", "video"),
                ("keyword", query),
                ("page", "1"),
                ("page_size", page_size.as_str()),
            ])
            .header(REFERER, "https://search.bilibili.com/")
            .header(ORIGIN, "https://search.bilibili.com")
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .header(COOKIE, buvid_cookie())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Backend(format!("HTTP {}", status)));
        }
        parse_response(&response.text().await?, options.max_results)
    }
}
