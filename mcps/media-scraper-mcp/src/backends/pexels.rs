//! Pexels image search
//!
//! Pexels serves its search page only to real browsers, so this backend
//! loads it through the shared [`BrowserSession`] and reads the photo grid
//! out of the rendered DOM. It holds the session lock for the whole
//! load-and-extract, so it never interleaves with navigate or screenshot.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use super::MediaBackend;
use crate::error::{MediaError, Result};
use crate::session::BrowserSession;
use crate::types::{MediaResult, MediaType, SearchOptions};

const SEARCH_BASE: &str = "https://www.pexels.com/search/";

const FALLBACK_WIDTH: u32 = 1920;
const FALLBACK_HEIGHT: u32 = 1080;

static PHOTO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"photos/(\d+)").expect("Invalid photo id regex"));

/// Collects raw photo records from the grid; falls back to any CDN image
const EXTRACT_JS: &str = r#"() => {
  const out = [];
  const record = (img, card) => {
    const src = img.getAttribute('src') || '';
    if (!src || src.includes('placeholder') || src.startsWith('data:image')) return;
    const srcset = (img.getAttribute('srcset') || '')
      .split(',')
      .map((part) => part.trim().split(' ')[0])
      .filter(Boolean);
    const link = card ? card.querySelector('a[href*="/"]') : null;
    out.push({
      id: (card && (card.getAttribute('data-photo-modal-medium-id') || card.getAttribute('data-id'))) || '',
      src: srcset.length ? srcset[srcset.length - 1] : src,
      alt: img.getAttribute('alt') || '',
      photographer: link ? (link.textContent || '').trim() : '',
      width: parseInt(img.getAttribute('width') || '0', 10) || 0,
      height: parseInt(img.getAttribute('height') || '0', 10) || 0,
    });
  };
  document.querySelectorAll('article img').forEach((img) => record(img, img.closest('article')));
  if (out.length === 0) {
    document.querySelectorAll('img[src*="images.pexels.com"]').forEach((img) => record(img, null));
  }
  return out;
}"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PhotoCard {
    id: String,
    src: String,
    alt: String,
    photographer: String,
    width: u32,
    height: u32,
}

pub struct PexelsBackend {
    session: Arc<BrowserSession>,
}

impl PexelsBackend {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

pub(crate) fn search_url(query: &str) -> Result<String> {
    let mut url = Url::parse(SEARCH_BASE)
        .map_err(|e| MediaError::Backend(format!("Invalid Pexels URL: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| MediaError::Backend("Pexels URL cannot take a path".to_string()))?
        .pop_if_empty()
        .push(query.trim())
        .push("");
    Ok(url.into())
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn parse_photos(value: Value, max_results: usize) -> Result<Vec<MediaResult>> {
    let cards: Vec<PhotoCard> = serde_json::from_value(value)?;
    let mut seen = HashSet::new();

    Ok(cards
        .into_iter()
        .enumerate()
        .filter_map(|(i, card)| {
            let id = Some(card.id.clone())
                .filter(|id| !id.is_empty())
                .or_else(|| {
                    PHOTO_ID_RE
                        .captures(&card.src)
                        .map(|caps| caps[1].to_string())
                })
                .unwrap_or_else(|| i.to_string());
            seen.insert(id.clone()).then_some((id, card))
        })
        .take(max_results)
        .map(|(id, card)| {
            let base = strip_query(&card.src);
            let title = if card.alt.trim().is_empty() {
                format!("Pexels Image {}", id)
            } else {
                card.alt.trim().to_string()
            };
            let preview = format!("{}?auto=compress&cs=tinysrgb&w=800", base);

            let mut item = MediaResult::new(
                format!("pexels_{}", id),
                title,
                format!("{}?auto=compress&cs=tinysrgb&dpr=2", base),
                MediaType::Image,
                "pexels",
            );
            item.preview_url = Some(preview.clone());
            item.thumbnail_url = Some(preview);
            item.width = Some(card.width).filter(|w| *w > 0).or(Some(FALLBACK_WIDTH));
            item.height = Some(card.height).filter(|h| *h > 0).or(Some(FALLBACK_HEIGHT));
            item.author = Some(card.photographer).filter(|p| !p.is_empty());
            item.license = Some("Pexels License".to_string());
            item
        })
        .collect())
}

#[async_trait]
impl MediaBackend for PexelsBackend {
    fn name(&self) -> &str {
        "pexels"
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
        let url = search_url(query)?;
        tracing::debug!("Loading Pexels search page {}", url);
        let cards = self.session.scrape(&url, EXTRACT_JS, Value::Null).await?;
        parse_photos(cards, options.max_results)
    }

    async fn close(&self) {
        if let Err(e) = self.session.close().await {
            tracing::debug!("Closing Pexels browser: {}", e);
        }
    }
}
