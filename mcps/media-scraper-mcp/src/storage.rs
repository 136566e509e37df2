//! Local storage tree for downloaded media
//!
//! A fixed set of directories under one root; file names come from the
//! caller or from a timestamp. There is no index: listings read the
//! directory each time.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::error::{MediaError, Result};
use crate::types::DownloadKind;

/// Every directory created on startup
pub const STORAGE_DIRS: [&str; 5] = ["videos", "music", "images", "svg", "thumbnails"];

/// Directories exposed through the file listing endpoints
pub const LISTABLE_DIRS: [&str; 4] = ["videos", "music", "images", "svg"];

/// A file found in one of the storage directories
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

/// Reject names that could escape their directory
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

pub fn is_listable_dir(dir: &str) -> bool {
    LISTABLE_DIRS.contains(&dir)
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory tree if it does not exist yet
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in STORAGE_DIRS {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    pub fn dir_for(&self, kind: DownloadKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Destination for a generic download: `<root>/<dir>/<name><ext>`
    ///
    /// The extension comes from the URL path, else the kind's default. The
    /// base name is the caller's `filename`, else `<kind>_<unix millis>`.
    pub fn resolve_download_path(
        &self,
        url: &Url,
        kind: DownloadKind,
        filename: Option<&str>,
    ) -> Result<PathBuf> {
        let ext = Path::new(url.path())
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_else(|| kind.default_extension().to_string());

        let base = match filename.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => {
                if !is_safe_filename(name) {
                    return Err(MediaError::InvalidRequest(format!(
                        "Invalid filename: {}",
                        name
                    )));
                }
                name.to_string()
            }
            None => format!("{}_{}", kind.as_str(), Utc::now().timestamp_millis()),
        };

        let file_name = if base.ends_with(&ext) {
            base
        } else {
            format!("{}{}", base, ext)
        };

        Ok(self.dir_for(kind).join(file_name))
    }

    /// Number of visible files in a directory; a missing directory counts as zero
    pub async fn count(&self, dir: &str) -> usize {
        match self.list(dir).await {
            Ok(files) => files.len(),
            Err(_) => 0,
        }
    }

    /// Visible files of one directory, sorted by name
    pub async fn list(&self, dir: &str) -> Result<Vec<StoredFile>> {
        let path = self.root.join(dir);
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            files.push(StoredFile {
                name,
                size: metadata.len(),
                created_at: metadata.created().ok().map(DateTime::<Utc>::from),
                modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Delete one stored file, refusing anything that is not a plain name
    pub async fn delete(&self, dir: &str, filename: &str) -> Result<()> {
        if !is_listable_dir(dir) {
            return Err(MediaError::InvalidRequest("Invalid type".to_string()));
        }
        if !is_safe_filename(filename) {
            return Err(MediaError::InvalidRequest("Invalid filename".to_string()));
        }

        let path = self.root.join(dir).join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound("File not found".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename() {
        assert!(is_safe_filename("clip.mp4"));
        assert!(!is_safe_filename("../secret"));
        assert!(!is_safe_filename("a/b.mp4"));
        assert!(!is_safe_filename("a\\b.mp4"));
        assert!(!is_safe_filename(""));
    }

    #[test]
    fn test_resolve_uses_url_extension() {
        let storage = Storage::new("/srv/storage");
        let url = Url::parse("https://example.com/media/a.webm?x=1").unwrap();
        let path = storage
            .resolve_download_path(&url, DownloadKind::Video, Some("intro"))
            .unwrap();
        assert_eq!(path, PathBuf::from("/srv/storage/videos/intro.webm"));
    }

    #[test]
    fn test_resolve_default_extension_and_no_double_suffix() {
        let storage = Storage::new("/srv/storage");
        let url = Url::parse("https://example.com/image").unwrap();
        let path = storage
            .resolve_download_path(&url, DownloadKind::Image, Some("cover.jpg"))
            .unwrap();
        assert_eq!(path, PathBuf::from("/srv/storage/images/cover.jpg"));
    }

    #[test]
    fn test_resolve_generated_name() {
        let storage = Storage::new("/srv/storage");
        let url = Url::parse("https://example.com/track.mp3").unwrap();
        let path = storage
            .resolve_download_path(&url, DownloadKind::Music, None)
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("music_"));
        assert!(name.ends_with(".mp3"));
        assert_eq!(path.parent().unwrap(), Path::new("/srv/storage/music"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let storage = Storage::new("/srv/storage");
        let url = Url::parse("https://example.com/a.svg").unwrap();
        let err = storage
            .resolve_download_path(&url, DownloadKind::Svg, Some("../../etc/passwd"))
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_layout_list_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.ensure_layout().await.unwrap();
        for sub in STORAGE_DIRS {
            assert!(dir.path().join(sub).is_dir());
        }

        tokio::fs::write(dir.path().join("videos/b.mp4"), b"12345").await.unwrap();
        tokio::fs::write(dir.path().join("videos/a.mp4"), b"1").await.unwrap();
        tokio::fs::write(dir.path().join("videos/.partial"), b"1").await.unwrap();

        let files = storage.list("videos").await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4"]);
        assert_eq!(files[1].size, 5);
        assert_eq!(storage.count("videos").await, 2);
        assert_eq!(storage.count("music").await, 0);
    }

    #[tokio::test]
    async fn test_delete_rejects_traversal_and_leaves_fs_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("storage"));
        storage.ensure_layout().await.unwrap();
        let outside = dir.path().join("keep.txt");
        tokio::fs::write(&outside, b"keep").await.unwrap();

        for name in ["../keep.txt", "..\\keep.txt", "x/../../keep.txt"] {
            let err = storage.delete("videos", name).await.unwrap_err();
            assert!(matches!(err, MediaError::InvalidRequest(_)), "{}", name);
        }
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_and_existing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        storage.ensure_layout().await.unwrap();

        let err = storage.delete("music", "none.mp3").await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));

        let err = storage.delete("thumbnails", "x.jpg").await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));

        tokio::fs::write(dir.path().join("music/song.mp3"), b"x").await.unwrap();
        storage.delete("music", "song.mp3").await.unwrap();
        assert!(!dir.path().join("music/song.mp3").exists());
    }
}
