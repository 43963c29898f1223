//! Concurrent image downloads with per-item timeouts.
//!
//! [`ImageFetcher::fetch_all`] returns exactly one [`DownloadResult`] per
//! input URL, in input order, whatever the completion order and whatever
//! fails. Each download runs as its own task and races a timer; when the
//! timer wins, the task is aborted and the item is reported as timed out.
//! Parallel mode bounds in-flight downloads with a semaphore.
//!
//! # Examples
//!
//! ```rust,no_run
//! use zentao::download::FetchMode;
//! use zentao::prelude::*;
//!
//! # async fn example(client: Zentao) -> zentao::Result<()> {
//! let urls = vec![
//!     "file-read-12.png".to_string(),
//!     "https://cdn.example.com/diagram.gif".to_string(),
//! ];
//! for result in client.fetch_images(&urls, FetchMode::Parallel).await {
//!     match result.format() {
//!         Some(format) => println!("{}: {} bytes of {}", result.url, result.size(), format),
//!         None => println!("{} failed: {}", result.url, result.error().unwrap_or_default()),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::net::log_target;
use crate::session::SessionManager;

/// Container format inferred from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Gif,
    Png,
}

impl ImageFormat {
    /// Recognises JPEG, GIF and PNG signatures; anything else is `None`.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"GIF8") {
            Some(ImageFormat::Gif)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(ImageFormat::Png)
        } else {
            None
        }
    }

    /// Like [`detect`](Self::detect), defaulting to PNG.
    ///
    /// ```rust
    /// use zentao::download::ImageFormat;
    ///
    /// assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
    /// assert_eq!(ImageFormat::sniff(b"GIF89a"), ImageFormat::Gif);
    /// assert_eq!(ImageFormat::sniff(b"RIFF....WEBP"), ImageFormat::Png);
    /// ```
    pub fn sniff(bytes: &[u8]) -> Self {
        Self::detect(bytes).unwrap_or(ImageFormat::Png)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::Png => "png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// What happened to one URL.
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    Success {
        data: Bytes,
        format: ImageFormat,
        size: usize,
    },
    Failed {
        error: String,
        timed_out: bool,
    },
}

/// Per-URL result of a batch download.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub url: String,
    pub outcome: DownloadOutcome,
}

impl DownloadResult {
    fn success(url: String, data: Bytes) -> Self {
        let format = ImageFormat::sniff(&data);
        let size = data.len();
        Self {
            url,
            outcome: DownloadOutcome::Success { data, format, size },
        }
    }

    fn failure(url: String, error: impl Into<String>, timed_out: bool) -> Self {
        Self {
            url,
            outcome: DownloadOutcome::Failed {
                error: error.into(),
                timed_out,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DownloadOutcome::Success { .. })
    }

    pub fn timed_out(&self) -> bool {
        matches!(
            self.outcome,
            DownloadOutcome::Failed {
                timed_out: true,
                ..
            }
        )
    }

    pub fn data(&self) -> Option<&Bytes> {
        match &self.outcome {
            DownloadOutcome::Success { data, .. } => Some(data),
            DownloadOutcome::Failed { .. } => None,
        }
    }

    pub fn format(&self) -> Option<ImageFormat> {
        match &self.outcome {
            DownloadOutcome::Success { format, .. } => Some(*format),
            DownloadOutcome::Failed { .. } => None,
        }
    }

    /// Payload size in bytes; 0 for failures.
    pub fn size(&self) -> usize {
        match &self.outcome {
            DownloadOutcome::Success { size, .. } => *size,
            DownloadOutcome::Failed { .. } => 0,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            DownloadOutcome::Success { .. } => None,
            DownloadOutcome::Failed { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// All items in flight at once, up to the configured concurrency.
    #[default]
    Parallel,
    /// One item at a time.
    Serial,
}

/// Downloads image URLs through the session manager.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    sessions: Arc<SessionManager>,
    timeout: Duration,
    concurrency: usize,
}

impl ImageFetcher {
    pub fn new(sessions: Arc<SessionManager>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            sessions,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Downloads every URL, returning one result per input in input order.
    /// Never fails as a whole.
    pub async fn fetch_all(&self, urls: &[String], mode: FetchMode) -> Vec<DownloadResult> {
        let results = match mode {
            FetchMode::Parallel => {
                let semaphore = Arc::new(Semaphore::new(self.concurrency));
                let downloads = urls.iter().map(|url| {
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let _permit = semaphore.acquire().await;
                        self.fetch_one(url.clone()).await
                    }
                });
                join_all(downloads).await
            }
            FetchMode::Serial => {
                let mut results = Vec::with_capacity(urls.len());
                for url in urls {
                    results.push(self.fetch_one(url.clone()).await);
                }
                results
            }
        };

        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::debug!(total = results.len(), failed, ?mode, "image batch finished");
        results
    }

    async fn fetch_one(&self, url: String) -> DownloadResult {
        let sessions = Arc::clone(&self.sessions);
        let target = url.clone();
        let mut handle = tokio::spawn(async move { sessions.fetch_bytes(&target).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(data))) => DownloadResult::success(url, data),
            Ok(Ok(Err(error))) => {
                tracing::warn!(target_path = log_target(&url), %error, "image download failed");
                DownloadResult::failure(url, error.to_string(), false)
            }
            Ok(Err(join_error)) => {
                tracing::warn!(target_path = log_target(&url), %join_error, "image download task failed");
                DownloadResult::failure(url, format!("download task failed: {}", join_error), false)
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    target_path = log_target(&url),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "image download timed out"
                );
                DownloadResult::failure(
                    url,
                    format!("timed out after {} ms", self.timeout.as_millis()),
                    true,
                )
            }
        }
    }
}
