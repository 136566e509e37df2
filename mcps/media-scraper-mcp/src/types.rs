//! Shared data model for media search and download results

use std::fmt;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// Media Types
// ============================================================================

/// Kind of media a backend item represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaType {
    Video,
    Music,
    SoundEffect,
    Image,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Music => "music",
            MediaType::SoundEffect => "sound-effect",
            MediaType::Image => "image",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which media types an aggregated search covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Video,
    Music,
    Image,
    #[default]
    All,
}

impl SearchScope {
    /// Media types in the fixed enumeration order: video, music, image
    pub fn media_types(&self) -> Vec<MediaType> {
        match self {
            SearchScope::Video => vec![MediaType::Video],
            SearchScope::Music => vec![MediaType::Music],
            SearchScope::Image => vec![MediaType::Image],
            SearchScope::All => vec![MediaType::Video, MediaType::Music, MediaType::Image],
        }
    }
}

/// Target category for a generic download, which decides the storage directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    Video,
    Image,
    Music,
    Svg,
}

impl DownloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadKind::Video => "video",
            DownloadKind::Image => "image",
            DownloadKind::Music => "music",
            DownloadKind::Svg => "svg",
        }
    }

    /// Storage subdirectory for this kind
    pub fn dir_name(&self) -> &'static str {
        match self {
            DownloadKind::Video => "videos",
            DownloadKind::Image => "images",
            DownloadKind::Music => "music",
            DownloadKind::Svg => "svg",
        }
    }

    /// Extension used when the URL path carries none
    pub fn default_extension(&self) -> &'static str {
        match self {
            DownloadKind::Video => ".mp4",
            DownloadKind::Image => ".jpg",
            DownloadKind::Music => ".mp3",
            DownloadKind::Svg => ".svg",
        }
    }
}

// ============================================================================
// Search Results
// ============================================================================

/// One normalized item returned by a backend adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaResult {
    /// `<source>_<native id>`, stable across calls unless the backend has no native id
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Set by backends that fetch the file themselves (the image crawler)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl MediaResult {
    /// Minimal item; remaining fields are filled in by the adapter
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        media_type: MediaType,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            url: url.into(),
            detail_url: None,
            preview_url: None,
            thumbnail_url: None,
            duration: None,
            width: None,
            height: None,
            media_type,
            source: source.into(),
            license: None,
            tags: Vec::new(),
            author: None,
            local_path: None,
            size_bytes: None,
        }
    }
}

/// Per-backend search knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_results: usize,
    pub genre: Option<String>,
    pub mood: Option<String>,
}

impl SearchOptions {
    pub fn with_max_results(max_results: usize) -> Self {
        Self {
            max_results,
            genre: None,
            mood: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounts {
    pub videos: usize,
    pub music: usize,
    pub images: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaBuckets {
    pub videos: Vec<MediaResult>,
    pub music: Vec<MediaResult>,
    pub images: Vec<MediaResult>,
}

impl MediaBuckets {
    /// Bucket receiving items of the given type; sound effects share the music bucket
    pub fn bucket_mut(&mut self, media_type: MediaType) -> &mut Vec<MediaResult> {
        match media_type {
            MediaType::Video => &mut self.videos,
            MediaType::Music | MediaType::SoundEffect => &mut self.music,
            MediaType::Image => &mut self.images,
        }
    }

    pub fn counts(&self) -> MediaCounts {
        MediaCounts {
            videos: self.videos.len(),
            music: self.music.len(),
            images: self.images.len(),
            total: self.videos.len() + self.music.len() + self.images.len(),
        }
    }
}

/// Best-effort union of every backend queried for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedSearchResult {
    pub query: String,
    #[serde(rename = "type")]
    pub scope: SearchScope,
    pub region_policy: bool,
    pub counts: MediaCounts,
    pub results: MediaBuckets,
    /// `"<source> <type>: <message>"` for every failed backend call; absent when none failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

// ============================================================================
// Downloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub local_path: PathBuf,
    pub size_bytes: u64,
}
