//! Concurrent HTTP fetcher for manifests and update artifacts.
//!
//! Every transfer has an idle window: each received chunk resets it, and
//! when it runs out the request is dropped (closing the socket) and the
//! task fails with a timeout. File sinks are written next to their target
//! and only renamed into place once flushed and synced.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use updatex_types::{UpdateError, UpdateResult};

use crate::core::config::DEFAULT_STALL_TIMEOUT_SECS;

/// Progress callback for download operations
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Where the bytes of a task go
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadSink {
    /// Buffer in memory and parse as JSON on completion
    Memory,
    /// Stream to this file
    File(PathBuf),
}

/// One URL to fetch
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub url: String,
    pub sink: DownloadSink,
}

impl DownloadTask {
    pub fn memory(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sink: DownloadSink::Memory,
        }
    }

    pub fn to_file(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            sink: DownloadSink::File(path.into()),
        }
    }
}

/// Result of a settled task
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutput {
    Json(serde_json::Value),
    File { path: PathBuf, bytes: u64 },
}

/// Emitted whenever a task's whole-percent value changes
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Index of the task in the `fetch_all` call
    pub task: usize,
    pub url: String,
    pub received: u64,
    pub total: Option<u64>,
    pub percent: u8,
}

/// Tracks received bytes against the declared length of one transfer
#[derive(Debug)]
struct ProgressTracker {
    total: Option<u64>,
    received: u64,
    last_percent: Option<u8>,
}

impl ProgressTracker {
    fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|total| *total > 0),
            received: 0,
            last_percent: None,
        }
    }

    /// Record `len` more bytes; returns the new percent only when it changed
    fn advance(&mut self, len: usize) -> Option<u8> {
        self.received += len as u64;
        let total = self.total?;
        let percent = (self.received.saturating_mul(100) / total).min(100) as u8;
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(percent)
    }
}

/// Update downloader
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    stall_timeout: Duration,
}

impl Downloader {
    pub fn new(stall_timeout: Duration) -> UpdateResult<Self> {
        Self::with_headers(stall_timeout, &[])
    }

    /// Downloader that sends `headers` with every request
    pub fn with_headers(
        stall_timeout: Duration,
        headers: &[(String, String)],
    ) -> UpdateResult<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                UpdateError::configuration(format!("Invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                UpdateError::configuration(format!("Invalid value for header {}: {}", name, e))
            })?;
            default_headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("updatex/", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers)
            .build()
            .map_err(|e| {
                UpdateError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            stall_timeout,
        })
    }

    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    /// Fetch every task concurrently.
    ///
    /// Results come back in task order. The first failure cancels the
    /// remaining transfers and is returned.
    pub async fn fetch_all(
        &self,
        tasks: Vec<DownloadTask>,
        on_progress: Option<ProgressCallback>,
    ) -> UpdateResult<Vec<DownloadOutput>> {
        log::debug!("[Downloader] Fetching {} task(s)", tasks.len());

        let transfers = tasks.into_iter().enumerate().map(|(index, task)| {
            let on_progress = on_progress.clone();
            async move { self.fetch(index, task, on_progress.as_ref()).await }
        });

        futures::future::try_join_all(transfers).await
    }

    /// Fetch a single URL into memory and parse it as JSON
    pub async fn fetch_json(&self, url: &str) -> UpdateResult<serde_json::Value> {
        match self.fetch(0, DownloadTask::memory(url), None).await? {
            DownloadOutput::Json(value) => Ok(value),
            DownloadOutput::File { path, .. } => Err(UpdateError::filesystem(
                path,
                "expected an in-memory transfer",
            )),
        }
    }

    async fn fetch(
        &self,
        index: usize,
        task: DownloadTask,
        on_progress: Option<&ProgressCallback>,
    ) -> UpdateResult<DownloadOutput> {
        let url = task.url.as_str();
        log::info!("[Downloader] GET {}", url);

        let mut response = self
            .stalled(url, self.client.get(url).send())
            .await?
            .map_err(|e| UpdateError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut tracker = ProgressTracker::new(response.content_length());
        let mut report = |len: usize| {
            if let Some(percent) = tracker.advance(len) {
                if let Some(callback) = on_progress {
                    callback(DownloadProgress {
                        task: index,
                        url: url.to_string(),
                        received: tracker.received,
                        total: tracker.total,
                        percent,
                    });
                }
            }
        };

        match &task.sink {
            DownloadSink::Memory => {
                let mut body = Vec::new();
                while let Some(chunk) = self.next_chunk(url, &mut response).await? {
                    body.extend_from_slice(&chunk);
                    report(chunk.len());
                }
                let value = serde_json::from_slice(&body)
                    .map_err(|e| UpdateError::parse(format!("JSON from {}", url), e))?;
                Ok(DownloadOutput::Json(value))
            }
            DownloadSink::File(path) => {
                let mut file = PartialFile::create(path).await?;
                while let Some(chunk) = self.next_chunk(url, &mut response).await? {
                    file.write(&chunk).await?;
                    report(chunk.len());
                }
                let bytes = file.commit().await?;
                log::info!("[Downloader] Saved {} bytes to {:?}", bytes, path);
                Ok(DownloadOutput::File {
                    path: path.clone(),
                    bytes,
                })
            }
        }
    }

    async fn next_chunk(
        &self,
        url: &str,
        response: &mut reqwest::Response,
    ) -> UpdateResult<Option<Bytes>> {
        self.stalled(url, response.chunk())
            .await?
            .map_err(|e| UpdateError::network(url, e))
    }

    /// Run `fut` inside the stall window
    async fn stalled<F: Future>(&self, url: &str, fut: F) -> UpdateResult<F::Output> {
        tokio::time::timeout(self.stall_timeout, fut)
            .await
            .map_err(|_| {
                log::warn!(
                    "[Downloader] No data from {} for {:?}, aborting",
                    url,
                    self.stall_timeout
                );
                UpdateError::timeout(url, self.stall_timeout)
            })
    }

    /// Extract filename from URL, ignoring query and fragment
    pub fn extract_filename_from_url(url: &str) -> Option<String> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        path.split('/')
            .next_back()
            .filter(|s| !s.is_empty() && !s.contains(':'))
            .map(|s| s.to_string())
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            stall_timeout: Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
        }
    }
}

/// A file being written at `<target>.partial`.
///
/// Dropping it without `commit` removes the partial file, so a failed or
/// cancelled transfer never leaves anything at the target path.
struct PartialFile {
    target: PathBuf,
    partial: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
    committed: bool,
}

impl PartialFile {
    async fn create(target: &Path) -> UpdateResult<Self> {
        let partial = partial_path(target);
        let file = File::create(&partial)
            .await
            .map_err(|e| UpdateError::filesystem(&partial, e))?;
        Ok(Self {
            target: target.to_path_buf(),
            partial,
            writer: Some(BufWriter::new(file)),
            written: 0,
            committed: false,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> UpdateResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(UpdateError::filesystem(&self.partial, "file already closed"));
        };
        writer
            .write_all(chunk)
            .await
            .map_err(|e| UpdateError::filesystem(&self.partial, e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flush, sync, close and move onto the target path
    async fn commit(mut self) -> UpdateResult<u64> {
        let Some(mut writer) = self.writer.take() else {
            return Err(UpdateError::filesystem(&self.partial, "file already closed"));
        };
        writer
            .flush()
            .await
            .map_err(|e| UpdateError::filesystem(&self.partial, e))?;
        let file = writer.into_inner();
        file.sync_all()
            .await
            .map_err(|e| UpdateError::filesystem(&self.partial, e))?;
        drop(file);

        tokio::fs::rename(&self.partial, &self.target)
            .await
            .map_err(|e| UpdateError::filesystem(&self.target, e))?;
        self.committed = true;
        Ok(self.written)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        self.writer.take();
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.partial) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "[Downloader] Failed to remove partial file {:?}: {}",
                    self.partial,
                    e
                );
            }
        }
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name: OsString = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".partial");
    target.with_file_name(name)
}
