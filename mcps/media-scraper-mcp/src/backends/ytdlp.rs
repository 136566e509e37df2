//! yt-dlp command line wrapper and the YouTube search backend built on it

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::OnceCell;

use super::MediaBackend;
use crate::config::ToolsConfig;
use crate::error::{MediaError, Result};
use crate::storage::is_safe_filename;
use crate::types::{MediaResult, MediaType, SearchOptions};

pub const NOT_INSTALLED: &str = "yt-dlp is not installed. Please install it with: pip install yt-dlp";

/// One downloadable format reported by yt-dlp
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub format_id: String,
    pub ext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

/// Metadata of a single video page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    pub platform: String,
    pub original_url: String,
    pub formats: Vec<VideoFormat>,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub url: String,
    pub output_dir: PathBuf,
    /// `best`, `1080p`, `720p`, `480p` or a raw yt-dlp format selector
    pub format: Option<String>,
    pub audio_only: bool,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoDownload {
    pub local_path: PathBuf,
    pub filename: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

pub struct YtDlp {
    program: String,
    timeout: Duration,
    available: OnceCell<bool>,
}

impl YtDlp {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            program: config.ytdlp_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            available: OnceCell::new(),
        }
    }

    /// Checked once with `--version`, then cached
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                match self.run(&["--version"]).await {
                    Ok(version) => {
                        tracing::info!("Found yt-dlp {}", version.trim());
                        true
                    }
                    Err(e) => {
                        tracing::warn!("yt-dlp unavailable: {}", e);
                        false
                    }
                }
            })
            .await
    }

    pub async fn ensure_available(&self) -> Result<()> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(MediaError::BackendUnavailable(NOT_INSTALLED.to_string()))
        }
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<MediaResult>> {
        let target = format!("ytsearch{}:{}", limit, query);
        let stdout = self
            .run(&[
                "--dump-json",
                "--flat-playlist",
                "--no-download",
                "--no-warnings",
                "--socket-timeout",
                "30",
                target.as_str(),
            ])
            .await?;
        Ok(parse_search_output(&stdout, limit))
    }

    pub async fn video_info(&self, url: &str) -> Result<VideoInfo> {
        let stdout = self
            .run(&["--dump-json", "--no-download", "--no-warnings", "--", url])
            .await
            .map_err(|e| MediaError::Backend(format!("Failed to get video info: {}", e)))?;
        let data: Value = serde_json::from_str(stdout.trim())?;
        Ok(parse_video_info(&data, url))
    }

    pub async fn download(&self, request: &DownloadRequest) -> Result<VideoDownload> {
        let args = download_args(request)?;
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&args).await?;
        parse_download_output(&stdout, &request.output_dir)
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::BackendUnavailable(NOT_INSTALLED.to_string()),
                _ => MediaError::Io(e),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                MediaError::Backend(format!("yt-dlp timed out after {}s", self.timeout.as_secs()))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Backend(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Command line for a download; the URL always follows `--`
pub(crate) fn download_args(request: &DownloadRequest) -> Result<Vec<String>> {
    let name = match request.filename.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => {
            if !is_safe_filename(name) {
                return Err(MediaError::InvalidRequest(format!("Invalid filename: {}", name)));
            }
            name
        }
        _ => "%(title)s.%(ext)s",
    };
    let template = request.output_dir.join(name).to_string_lossy().into_owned();

    let mut args = vec![
        "-o".to_string(),
        template,
        "--no-warnings".to_string(),
        "--print-json".to_string(),
    ];
    if request.audio_only {
        args.extend(["-x", "--audio-format", "mp3"].map(String::from));
    } else {
        args.push("-f".to_string());
        args.push(format_selector(request.format.as_deref().unwrap_or("best")));
    }
    args.push("--".to_string());
    args.push(request.url.clone());
    Ok(args)
}

pub(crate) fn format_selector(format: &str) -> String {
    match format {
        "best" => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
        "1080p" | "720p" | "480p" => {
            let height = format.trim_end_matches('p');
            format!(
                "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[height<={h}][ext=mp4]/best",
                h = height
            )
        }
        other => other.to_string(),
    }
}

pub(crate) fn detect_platform(url: &str) -> &'static str {
    let url = url.to_lowercase();
    let table: [(&[&str], &str); 7] = [
        (&["youtube.com", "youtu.be"], "youtube"),
        (&["bilibili.com", "b23.tv"], "bilibili"),
        (&["douyin.com"], "douyin"),
        (&["tiktok.com"], "tiktok"),
        (&["twitter.com", "x.com"], "twitter"),
        (&["instagram.com"], "instagram"),
        (&["vimeo.com"], "vimeo"),
    ];
    table
        .iter()
        .find(|(hosts, _)| hosts.iter().any(|host| url.contains(host)))
        .map(|(_, platform)| *platform)
        .unwrap_or("unknown")
}

fn str_of(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn u64_of(data: &Value, key: &str) -> Option<u64> {
    let value = data.get(key)?;
    value.as_u64().or_else(|| value.as_f64().map(|f| f.round() as u64))
}

fn u32_of(data: &Value, key: &str) -> Option<u32> {
    u64_of(data, key).and_then(|v| u32::try_from(v).ok())
}

pub(crate) fn parse_video_info(data: &Value, original_url: &str) -> VideoInfo {
    let formats = data
        .get("formats")
        .and_then(Value::as_array)
        .map(|formats| {
            formats
                .iter()
                .map(|f| VideoFormat {
                    format_id: str_of(f, "format_id").unwrap_or_default(),
                    ext: str_of(f, "ext").unwrap_or_default(),
                    resolution: str_of(f, "resolution"),
                    width: u32_of(f, "width"),
                    height: u32_of(f, "height"),
                    filesize: u64_of(f, "filesize").or_else(|| u64_of(f, "filesize_approx")),
                })
                .collect()
        })
        .unwrap_or_default();

    VideoInfo {
        id: str_of(data, "id").unwrap_or_default(),
        title: str_of(data, "title").unwrap_or_default(),
        description: str_of(data, "description"),
        duration: u64_of(data, "duration"),
        width: u32_of(data, "width"),
        height: u32_of(data, "height"),
        fps: data.get("fps").and_then(Value::as_f64),
        thumbnail_url: str_of(data, "thumbnail"),
        uploader_name: str_of(data, "uploader").or_else(|| str_of(data, "channel")),
        uploader_id: str_of(data, "uploader_id").or_else(|| str_of(data, "channel_id")),
        upload_date: str_of(data, "upload_date"),
        view_count: u64_of(data, "view_count"),
        like_count: u64_of(data, "like_count"),
        platform: str_of(data, "extractor")
            .map(|e| e.to_lowercase())
            .unwrap_or_else(|| detect_platform(original_url).to_string()),
        original_url: original_url.to_string(),
        formats,
    }
}

/// One JSON object per line; unparseable lines are skipped
pub(crate) fn parse_search_output(stdout: &str, limit: usize) -> Vec<MediaResult> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|data| {
            let id = str_of(&data, "id")?;
            let url = str_of(&data, "url")
                .filter(|u| u.starts_with("http"))
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id));
            let mut item = MediaResult::new(
                format!("youtube_{}", id),
                str_of(&data, "title").unwrap_or_else(|| format!("Video {}", id)),
                url.clone(),
                MediaType::Video,
                "youtube",
            );
            item.detail_url = Some(url);
            item.description = str_of(&data, "description");
            item.duration = u64_of(&data, "duration");
            item.thumbnail_url = str_of(&data, "thumbnail").or_else(|| {
                data.get("thumbnails")
                    .and_then(Value::as_array)
                    .and_then(|thumbs| thumbs.first())
                    .and_then(|thumb| str_of(thumb, "url"))
            });
            item.author = str_of(&data, "uploader").or_else(|| str_of(&data, "channel"));
            Some(item)
        })
        .take(limit)
        .collect()
}

/// `--print-json` emits the final info object on the last line
pub(crate) fn parse_download_output(stdout: &str, output_dir: &Path) -> Result<VideoDownload> {
    let last = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| MediaError::Backend("yt-dlp produced no output".to_string()))?;
    let data: Value = serde_json::from_str(last)?;

    let title = str_of(&data, "title").unwrap_or_default();
    let local_path = str_of(&data, "_filename")
        .or_else(|| str_of(&data, "filename"))
        .map(PathBuf::from)
        .unwrap_or_else(|| output_dir.join(format!("{}.mp4", title)));
    let filename = local_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(VideoDownload {
        local_path,
        filename,
        title,
        duration: u64_of(&data, "duration"),
        width: u32_of(&data, "width"),
        height: u32_of(&data, "height"),
        filesize: u64_of(&data, "filesize").or_else(|| u64_of(&data, "filesize_approx")),
    })
}

/// YouTube keyword search through `ytsearchN:`
pub struct YoutubeBackend {
    ytdlp: std::sync::Arc<YtDlp>,
}

impl YoutubeBackend {
    pub fn new(ytdlp: std::sync::Arc<YtDlp>) -> Self {
        Self { ytdlp }
    }
}

#[async_trait]
impl MediaBackend for YoutubeBackend {
    fn name(&self) -> &str {
        "youtube"
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
        self.ytdlp.ensure_available().await?;
        self.ytdlp.search(query, options.max_results).await
    }

    async fn is_available(&self) -> bool {
        self.ytdlp.is_available().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tools(path: &str) -> ToolsConfig {
        ToolsConfig {
            ytdlp_path: path.to_string(),
            timeout_secs: 5,
            ..ToolsConfig::default()
        }
    }

    #[test]
    fn test_format_selector_presets() {
        assert_eq!(
            format_selector("best"),
            "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"
        );
        assert_eq!(
            format_selector("720p"),
            "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[height<=720][ext=mp4]/best"
        );
        assert_eq!(format_selector("worst"), "worst");
    }

    #[test]
    fn test_detect_platform() {
        assert_eq!(detect_platform("https://youtu.be/abc"), "youtube");
        assert_eq!(detect_platform("https://b23.tv/xyz"), "bilibili");
        assert_eq!(detect_platform("https://X.com/status/1"), "twitter");
        assert_eq!(detect_platform("https://example.org"), "unknown");
    }

    #[test]
    fn test_parse_search_output() {
        let stdout = [
            json!({"id": "abc", "title": "Forest", "duration": 61.4, "uploader": "Nature",
                   "thumbnails": [{"url": "https://i.ytimg.com/abc.jpg"}]})
            .to_string(),
            "WARNING: not json".to_string(),
            json!({"id": "def", "url": "https://www.youtube.com/watch?v=def", "thumbnail": "t.jpg"}).to_string(),
            json!({"title": "no id"}).to_string(),
        ]
        .join("\n");

        let results = parse_search_output(&stdout, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "youtube_abc");
        assert_eq!(results[0].url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(results[0].duration, Some(61));
        assert_eq!(results[0].thumbnail_url.as_deref(), Some("https://i.ytimg.com/abc.jpg"));
        assert_eq!(results[0].author.as_deref(), Some("Nature"));
        assert_eq!(results[1].title, "Video def");
        assert_eq!(parse_search_output(&stdout, 1).len(), 1);
    }

    #[test]
    fn test_parse_video_info() {
        let data = json!({
            "id": "abc", "title": "Forest", "duration": 120, "channel": "Nature",
            "formats": [{"format_id": "18", "ext": "mp4", "height": 360, "filesize_approx": 1000}]
        });
        let info = parse_video_info(&data, "https://www.youtube.com/watch?v=abc");
        assert_eq!(info.platform, "youtube");
        assert_eq!(info.uploader_name.as_deref(), Some("Nature"));
        assert_eq!(info.formats.len(), 1);
        assert_eq!(info.formats[0].filesize, Some(1000));

        let info = parse_video_info(&json!({"id": "x", "extractor": "BiliBili"}), "https://b23.tv/x");
        assert_eq!(info.platform, "bilibili");
    }

    #[test]
    fn test_parse_download_output() {
        let dir = Path::new("/tmp/videos");
        let stdout = format!(
            "[download] 100%\n{}\n",
            json!({"title": "Forest", "_filename": "/tmp/videos/Forest.mp4", "duration": 30})
        );
        let download = parse_download_output(&stdout, dir).unwrap();
        assert_eq!(download.local_path, PathBuf::from("/tmp/videos/Forest.mp4"));
        assert_eq!(download.filename, "Forest.mp4");
        assert_eq!(download.duration, Some(30));

        let fallback = parse_download_output(&json!({"title": "Lake"}).to_string(), dir).unwrap();
        assert_eq!(fallback.local_path, dir.join("Lake.mp4"));

        assert!(parse_download_output("", dir).is_err());
    }

    fn download_request(url: &str, filename: Option<&str>) -> DownloadRequest {
        DownloadRequest {
            url: url.to_string(),
            output_dir: PathBuf::from("/srv/storage/videos"),
            format: Some("720p".to_string()),
            audio_only: false,
            filename: filename.map(str::to_string),
        }
    }

    #[test]
    fn test_download_args_end_with_url_after_separator() {
        let args = download_args(&download_request("--exec=rm -rf ~", None)).unwrap();
        let n = args.len();
        assert_eq!(args[n - 2], "--");
        assert_eq!(args[n - 1], "--exec=rm -rf ~");
        assert_eq!(args[1], "/srv/storage/videos/%(title)s.%(ext)s");
        assert!(args.contains(&format_selector("720p")));

        let args = download_args(&download_request("https://youtu.be/x", Some("clip.%(ext)s"))).unwrap();
        assert_eq!(args[1], "/srv/storage/videos/clip.%(ext)s");
    }

    #[test]
    fn test_download_args_audio_only() {
        let request = DownloadRequest {
            audio_only: true,
            ..download_request("https://youtu.be/x", None)
        };
        let args = download_args(&request).unwrap();
        assert!(args.windows(3).any(|w| w == ["-x", "--audio-format", "mp3"]));
        assert!(!args.iter().any(|a| a == "-f"));
    }

    #[tokio::test]
    async fn test_download_rejects_unsafe_filename() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("videos");
        let request = DownloadRequest {
            output_dir: output_dir.clone(),
            ..download_request("https://youtu.be/x", Some("../escape"))
        };

        let err = YtDlp::new(&tools("/nonexistent/yt-dlp-binary"))
            .download(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));
        assert!(!output_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let ytdlp = YtDlp::new(&tools("/nonexistent/yt-dlp-binary"));
        assert!(!ytdlp.is_available().await);

        let backend = YoutubeBackend::new(std::sync::Arc::new(ytdlp));
        let err = backend
            .search("forest", MediaType::Video, &SearchOptions::with_max_results(3))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::BackendUnavailable(_)));
        assert_eq!(err.to_string(), NOT_INSTALLED);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_json_output_yields_no_results() {
        // `echo` answers `--version` and prints its arguments for searches
        let backend = YoutubeBackend::new(std::sync::Arc::new(YtDlp::new(&tools("echo"))));
        assert!(backend.is_available().await);

        let results = backend
            .search("forest", MediaType::Video, &SearchOptions::with_max_results(5))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
