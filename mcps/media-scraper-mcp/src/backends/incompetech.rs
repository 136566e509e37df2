//! Incompetech royalty-free music catalogue
//!
//! The whole catalogue is one JSON document. It is fetched on first use,
//! cached for an hour and filtered locally.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{parse_clock_duration, MediaBackend};
use crate::error::{MediaError, Result};
use crate::types::{MediaResult, MediaType, SearchOptions};

const CACHE_TTL: Duration = Duration::from_secs(3600);
const SITE: &str = "https://incompetech.com";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Track {
    uuid: Option<String>,
    isrc: Option<String>,
    filename: Option<String>,
    title: String,
    description: Option<String>,
    genre: Option<String>,
    feel: Option<String>,
    instruments: Option<String>,
    tags: Option<String>,
    length: Option<String>,
}

impl Track {
    fn id(&self) -> Option<&str> {
        self.uuid
            .as_deref()
            .or(self.isrc.as_deref())
            .or(self.filename.as_deref())
    }

    fn matches_keyword(&self, keyword: &str) -> bool {
        if keyword.is_empty() {
            return true;
        }
        [
            Some(self.title.as_str()),
            self.description.as_deref(),
            self.genre.as_deref(),
            self.feel.as_deref(),
            self.tags.as_deref(),
            self.instruments.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(keyword))
    }

    fn to_result(&self) -> MediaResult {
        let id = self.id().unwrap_or_default();
        let page_key = self.isrc.as_deref().unwrap_or(id);
        let file = self
            .filename
            .clone()
            .unwrap_or_else(|| format!("{}.mp3", self.title));
        let encoded: String = url::form_urlencoded::byte_serialize(file.as_bytes()).collect();

        let mut item = MediaResult::new(
            format!("incompetech_{}", id),
            self.title.clone(),
            format!("{}/music/royalty-free/index.html?isrc={}", SITE, page_key),
            MediaType::Music,
            "incompetech",
        );
        item.description = self.description.clone();
        item.preview_url = Some(format!(
            "{}/music/royalty-free/mp3-royaltyfree/{}",
            SITE,
            encoded.replace('+', "%20")
        ));
        item.duration = self.length.as_deref().and_then(parse_clock_duration);
        item.license = Some("Creative Commons BY 4.0".to_string());
        item.author = Some("Kevin MacLeod".to_string());
        item.tags = [self.genre.clone(), self.feel.clone()]
            .into_iter()
            .flatten()
            .filter(|tag| !tag.is_empty())
            .collect();
        item
    }
}

struct Catalogue {
    tracks: Vec<Track>,
    fetched_at: Instant,
}

pub struct IncompetechBackend {
    client: Client,
    catalogue_url: String,
    cache: Mutex<Option<Catalogue>>,
}

impl IncompetechBackend {
    pub fn new(client: Client) -> Self {
        Self::with_catalogue_url(client, format!("{}/music/royalty-free/pieces.json", SITE))
    }

    pub fn with_catalogue_url(client: Client, catalogue_url: impl Into<String>) -> Self {
        Self {
            client,
            catalogue_url: catalogue_url.into(),
            cache: Mutex::new(None),
        }
    }

    async fn tracks(&self) -> Result<Vec<Track>> {
        let mut cache = self.cache.lock().await;
        if let Some(catalogue) = cache.as_ref() {
            if catalogue.fetched_at.elapsed() < CACHE_TTL {
                return Ok(catalogue.tracks.clone());
            }
        }

        let response = self.client.get(&self.catalogue_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Backend(format!("HTTP {}", status)));
        }
        let tracks = parse_catalogue(response.json().await?);
        tracing::debug!("Fetched incompetech catalogue: {} tracks", tracks.len());

        *cache = Some(Catalogue {
            tracks: tracks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(tracks)
    }
}

/// Accepts a bare array or an object wrapping `tracks` / `music`
pub(crate) fn parse_catalogue(document: Value) -> Vec<Track> {
    let list = match document {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("tracks").or_else(|| map.remove("music")) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    list.into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

pub(crate) fn filter_tracks(tracks: &[Track], query: &str, options: &SearchOptions) -> Vec<MediaResult> {
    let keyword = query.trim().to_lowercase();
    let genre = options.genre.as_deref().map(str::to_lowercase);
    let mood = options.mood.as_deref().map(str::to_lowercase);

    tracks
        .iter()
        .filter(|track| track.matches_keyword(&keyword))
        .filter(|track| match &genre {
            Some(genre) => track.genre.as_deref().map(str::to_lowercase).as_ref() == Some(genre),
            None => true,
        })
        .filter(|track| match &mood {
            Some(mood) => track
                .feel
                .as_deref()
                .is_some_and(|feel| feel.to_lowercase().contains(mood.as_str())),
            None => true,
        })
        .take(options.max_results)
        .map(Track::to_result)
        .collect()
}

#[async_trait]
impl MediaBackend for IncompetechBackend {
    fn name(&self) -> &str {
        "incompetech"
    }

    fn supports(&self, media_type: MediaType) -> bool {
        media_type == MediaType::Music
    }

    async fn search(
        &self,
        query: &str,
        _media_type: MediaType,
        options: &SearchOptions,
    ) -> Result<Vec<MediaResult>> {
        let tracks = self.tracks().await?;
        Ok(filter_tracks(&tracks, query, options))
    }

    async fn close(&self) {
        self.cache.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    fn catalogue() -> Value {
        json!([
            {"uuid": "u-1", "isrc": "USUAN1100001", "filename": "Sneaky Snitch.mp3", "title": "Sneaky Snitch",
             "genre": "Comedy", "feel": "Mysterious, Bouncy", "length": "3:15", "instruments": "Piano"},
            {"isrc": "USUAN1100002", "title": "Deep Forest", "description": "Dark woods",
             "genre": "Ambient", "feel": "Dark, Calm", "length": "1:02:03"},
            {"filename": "plain.mp3", "title": "Plain", "genre": "Rock"},
            "not a track"
        ])
    }

    #[test]
    fn test_parse_catalogue_shapes() {
        assert_eq!(parse_catalogue(catalogue()).len(), 3);
        assert_eq!(parse_catalogue(json!({"tracks": catalogue()})).len(), 3);
        assert_eq!(parse_catalogue(json!({"music": catalogue()})).len(), 3);
        assert!(parse_catalogue(json!({"other": 1})).is_empty());
    }

    #[test]
    fn test_keyword_genre_and_mood_filters() {
        let tracks = parse_catalogue(catalogue());
        let opts = SearchOptions::with_max_results(10);

        let hits = filter_tracks(&tracks, "PIANO", &opts);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "incompetech_u-1");
        assert_eq!(hits[0].duration, Some(195));
        assert_eq!(
            hits[0].url,
            "https://incompetech.com/music/royalty-free/index.html?isrc=USUAN1100001"
        );
        assert_eq!(
            hits[0].preview_url.as_deref(),
            Some("https://incompetech.com/music/royalty-free/mp3-royaltyfree/Sneaky%20Snitch.mp3")
        );
        assert_eq!(hits[0].tags, vec!["Comedy", "Mysterious, Bouncy"]);

        let genre = SearchOptions {
            genre: Some("ambient".into()),
            ..SearchOptions::with_max_results(10)
        };
        let hits = filter_tracks(&tracks, "", &genre);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "incompetech_USUAN1100002");
        assert_eq!(hits[0].duration, Some(3723));

        let mood = SearchOptions {
            mood: Some("calm".into()),
            ..SearchOptions::with_max_results(10)
        };
        assert_eq!(filter_tracks(&tracks, "", &mood).len(), 1);

        assert_eq!(filter_tracks(&tracks, "", &SearchOptions::with_max_results(2)).len(), 2);
        assert_eq!(filter_tracks(&tracks, "", &opts)[2].id, "incompetech_plain.mp3");
    }

    #[tokio::test]
    async fn test_catalogue_cached_until_close() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/pieces.json",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(catalogue())
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/pieces.json", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let backend = IncompetechBackend::with_catalogue_url(Client::new(), url);
        let opts = SearchOptions::with_max_results(10);

        assert_eq!(backend.search("forest", MediaType::Music, &opts).await.unwrap().len(), 1);
        assert_eq!(backend.search("snitch", MediaType::Music, &opts).await.unwrap().len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        backend.close().await;
        backend.search("forest", MediaType::Music, &opts).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
