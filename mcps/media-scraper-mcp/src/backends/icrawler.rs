//! Bing and Baidu image search through the Python icrawler package
//!
//! The crawler downloads images into a temp directory, so results already
//! carry a `localPath`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::MediaBackend;
use crate::error::{MediaError, Result};
use crate::types::{MediaResult, MediaType, SearchOptions};

const SCRIPT: &str = include_str!("../../scripts/image_search.py");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Bing,
    Baidu,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bing => "bing",
            Self::Baidu => "baidu",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IcrawlerConfig {
    pub python_path: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CrawlFile {
    path: PathBuf,
    filename: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct CrawlOutput {
    success: bool,
    #[serde(default)]
    files: Vec<CrawlFile>,
    error: Option<String>,
}

pub struct IcrawlerBackend {
    engine: Engine,
    config: IcrawlerConfig,
}

impl IcrawlerBackend {
    pub fn new(engine: Engine, config: IcrawlerConfig) -> Self {
        Self { engine, config }
    }

    async fn crawl(&self, keyword: &str, max_num: usize) -> Result<String> {
        let max_num = max_num.to_string();
        let child = Command::new(&self.config.python_path)
            .args(["-c", SCRIPT, self.engine.as_str(), keyword, max_num.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MediaError::BackendUnavailable(format!("Failed to start Python process: {}", e))
            })?;

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                MediaError::Backend(format!(
                    "icrawler search timeout after {}s",
                    self.config.timeout.as_secs()
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() && serde_json::from_str::<CrawlOutput>(stdout.trim()).is_err() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Backend(format!(
                "icrawler process failed ({}): {}",
                output.status,
                if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
            )));
        }
        Ok(stdout)
    }
}

pub(crate) fn parse_output(engine: Engine, stdout: &str, stamp: i64) -> Result<Vec<MediaResult>> {
    let output: CrawlOutput = serde_json::from_str(stdout.trim())
        .map_err(|_| MediaError::Backend(format!("Failed to parse icrawler output: {}", stdout.trim())))?;

    if !output.success {
        return Err(MediaError::Backend(
            output.error.unwrap_or_else(|| "icrawler search failed".to_string()),
        ));
    }

    Ok(output
        .files
        .into_iter()
        .enumerate()
        .map(|(i, file)| {
            let url = url::Url::from_file_path(&file.path)
                .map(String::from)
                .unwrap_or_else(|_| file.path.to_string_lossy().into_owned());
            let mut item = MediaResult::new(
                format!("{}_image_{}_{}", engine.as_str(), i, stamp),
                file.filename,
                url,
                MediaType::Image,
                engine.as_str(),
            );
            item.local_path = Some(file.path.to_string_lossy().into_owned());
            item.size_bytes = Some(file.size);
            item
        })
        .collect())
}

#[async_trait]
impl MediaBackend for IcrawlerBackend {
    fn name(&self) -> &str {
        self.engine.as_str()
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
        let stdout = self.crawl(query, options.max_results).await?;
        parse_output(self.engine, &stdout, chrono::Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let stdout = r#"{"success": true, "engine": "bing", "keyword": "cat", "requested": 2, "downloaded": 2,
            "files": [{"path": "/tmp/icrawler_bing_x/000001.jpg", "filename": "000001.jpg", "size": 2048},
                      {"path": "/tmp/icrawler_bing_x/000002.png", "filename": "000002.png", "size": 10}],
            "temp_dir": "/tmp/icrawler_bing_x"}"#;

        let results = parse_output(Engine::Bing, stdout, 1700).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "bing_image_0_1700");
        assert_eq!(results[0].title, "000001.jpg");
        assert_eq!(results[0].url, "file:///tmp/icrawler_bing_x/000001.jpg");
        assert_eq!(results[0].local_path.as_deref(), Some("/tmp/icrawler_bing_x/000001.jpg"));
        assert_eq!(results[0].size_bytes, Some(2048));
        assert_eq!(results[1].source, "bing");
    }

    #[test]
    fn test_parse_reported_failure() {
        let err = parse_output(
            Engine::Baidu,
            r#"{"success": false, "error": "No module named 'icrawler'"}"#,
            0,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "No module named 'icrawler'");
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_output(Engine::Bing, "Traceback ...", 0).unwrap_err();
        assert!(err.to_string().contains("Failed to parse icrawler output"));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let backend = IcrawlerBackend::new(
            Engine::Bing,
            IcrawlerConfig {
                python_path: "/nonexistent/python-binary".to_string(),
                timeout: Duration::from_secs(5),
            },
        );
        let err = backend
            .search("cat", MediaType::Image, &SearchOptions::with_max_results(2))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::BackendUnavailable(_)));
    }

    #[test]
    fn test_engine_names() {
        let config = IcrawlerConfig {
            python_path: "python".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(IcrawlerBackend::new(Engine::Baidu, config).name(), "baidu");
    }
}
