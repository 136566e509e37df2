//! REST API handlers
//!
//! Thin adapters over [`Dispatcher`](crate::dispatcher::Dispatcher). Request
//! bodies are taken as loose JSON so a missing `query` or `url` can be
//! answered with a plain 400 before anything else runs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::state::AppState;
use crate::backends::ytdlp::NOT_INSTALLED;
use crate::dispatcher::{DownloadMediaParams, DownloadVideoParams, SearchMediaParams};
use crate::error::MediaError;
use crate::storage::{is_listable_dir, StoredFile, LISTABLE_DIRS};
use crate::types::{MediaType, SearchOptions};

/// Error response with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: json!({ "success": false, "error": message.into() }),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "success": false, "error": message.into() }),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::InvalidRequest(message) => Self::bad_request(message),
            MediaError::NotFound(message) => Self::not_found(message),
            other => {
                tracing::error!("Request failed: {}", other);
                Self::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Non-empty string field of a loose JSON body
fn required_field(body: &Value, field: &str) -> Result<String, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", field)))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::bad_request(e.to_string()))
}

// ============================================================================
// Status
// ============================================================================

/// Health, yt-dlp availability and stored file counts
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let storage = state.dispatcher.storage();
    let mut counts = serde_json::Map::new();
    for dir in LISTABLE_DIRS {
        counts.insert(dir.to_string(), json!(storage.count(dir).await));
    }

    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
        "ytdlp": state.dispatcher.ytdlp().is_available().await,
        "storage": counts,
    }))
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SingleSearchBody {
    source: Option<String>,
    max_results: Option<usize>,
    genre: Option<String>,
    mood: Option<String>,
}

async fn single_search(
    state: &AppState,
    media_type: MediaType,
    default_source: &str,
    body: Value,
) -> ApiResult {
    let query = required_field(&body, "query")?;
    let params: SingleSearchBody = parse_body(body)?;
    let source = params
        .source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default_source.to_string());

    let options = SearchOptions {
        max_results: params.max_results.unwrap_or(10),
        genre: params.genre,
        mood: params.mood,
    };
    let results = state
        .dispatcher
        .aggregator()
        .search_source(&source, &query, media_type, &options)
        .await?;

    Ok(Json(json!({
        "success": true,
        "query": query,
        "source": source,
        "count": results.len(),
        "results": results,
    })))
}

pub async fn search_video(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult {
    single_search(&state, MediaType::Video, "mixkit", body).await
}

pub async fn search_image(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult {
    single_search(&state, MediaType::Image, "pexels", body).await
}

pub async fn search_music(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult {
    single_search(&state, MediaType::Music, "incompetech", body).await
}

/// Aggregated search, same contract as the `search_media` tool
pub async fn search_media(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult {
    required_field(&body, "query")?;
    let params: SearchMediaParams = parse_body(body)?;
    let result = state.dispatcher.search_media(&params).await?;

    let mut value = serde_json::to_value(&result).map_err(|e| ApiError::internal(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        map.insert("success".to_string(), json!(true));
    }
    Ok(Json(value))
}

// ============================================================================
// Downloads
// ============================================================================

pub async fn download(State(state): State<AppState>, Json(mut body): Json<Value>) -> ApiResult {
    required_field(&body, "url")?;
    if let Value::Object(map) = &mut body {
        map.entry("type").or_insert_with(|| json!("video"));
    }
    let params: DownloadMediaParams = parse_body(body)?;
    let media = state.dispatcher.download_media(&params).await?;

    Ok(Json(json!({
        "success": true,
        "localPath": media.local_path,
        "localUrl": state.local_url(&media.local_path),
        "size": media.size,
        "filename": media.filename,
        "type": media.kind,
    })))
}

pub async fn ytdlp_download(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult {
    required_field(&body, "url")?;
    let params: DownloadVideoParams = parse_body(body)?;
    if !state.dispatcher.ytdlp().is_available().await {
        return Err(ApiError::unavailable(NOT_INSTALLED));
    }

    let result = state.dispatcher.download_video(&params).await?;
    Ok(Json(json!({
        "success": true,
        "localPath": result.local_path,
        "localUrl": state.local_url(&result.local_path),
        "title": result.title,
        "duration": result.duration,
    })))
}

pub async fn ytdlp_info(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult {
    let url = required_field(&body, "url")?;
    if !state.dispatcher.ytdlp().is_available().await {
        return Err(ApiError::unavailable(NOT_INSTALLED));
    }

    let info = state.dispatcher.video_info(&url).await?;
    Ok(Json(json!({ "success": true, "info": info })))
}

// ============================================================================
// Files
// ============================================================================

#[derive(Debug, Serialize)]
struct FileEntry {
    #[serde(flatten)]
    file: StoredFile,
    url: String,
}

fn invalid_type() -> ApiError {
    ApiError::bad_request(format!(
        "Invalid type. Must be one of: {}",
        LISTABLE_DIRS.join(", ")
    ))
}

pub async fn list_files(State(state): State<AppState>, Path(dir): Path<String>) -> ApiResult {
    if !is_listable_dir(&dir) {
        return Err(invalid_type());
    }

    let files: Vec<FileEntry> = state
        .dispatcher
        .storage()
        .list(&dir)
        .await?
        .into_iter()
        .map(|file| {
            let url = format!("{}/storage/{}/{}", state.public_url, dir, file.name);
            FileEntry { file, url }
        })
        .collect();

    Ok(Json(json!({ "files": files })))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path((dir, filename)): Path<(String, String)>,
) -> ApiResult {
    if !is_listable_dir(&dir) {
        return Err(invalid_type());
    }
    state.dispatcher.storage().delete(&dir, &filename).await?;
    tracing::info!("Deleted {}/{}", dir, filename);

    Ok(Json(json!({
        "success": true,
        "message": format!("Deleted {}", filename),
    })))
}

