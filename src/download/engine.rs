//! Streaming download engine with mirror fallback.
//!
//! Tries a [`DownloadCandidate`]'s mirrors in preference order until one
//! delivers, streaming the payload to disk. Progress is reported through an
//! optional callback invoked at a bounded rate so it can never stall the
//! transfer loop, and a cancellation token aborts mid-stream without leaking
//! the connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::manifest::DownloadCandidate;
use crate::net::FetchError;
use crate::user_agent::UserAgentPool;

use super::error::DownloadError;
use super::filename::sanitize_filename;

/// Transfers can take a while; only the connect phase stays short.
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle-read timeout between chunks.
const DOWNLOAD_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimum interval between progress callbacks (at most twice per second).
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Progress snapshot handed to the callback.
#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    /// Expected total, when the server announced one.
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    /// Completion percentage, when the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        self.total_bytes
            .filter(|total| *total > 0)
            .map(|total| (self.bytes_downloaded as f64 / total as f64) * 100.0)
    }
}

/// Progress callback; must be cheap, it runs on the transfer task.
pub type ProgressFn = dyn Fn(DownloadProgress) + Send + Sync;

/// Per-download options.
#[derive(Default)]
pub struct DownloadOptions {
    /// Invoked at most twice per second, plus once on completion.
    pub progress: Option<Box<ProgressFn>>,
    /// Aborts the transfer when fired.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("progress", &self.progress.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A completed download.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes_downloaded: u64,
    /// Which mirror delivered the file.
    pub url_used: String,
}

/// Streaming downloader, created once and reused across files.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    user_agent: String,
}

impl Downloader {
    /// Creates a downloader with transfer-friendly timeouts.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest` error when client construction fails.
    pub fn new() -> Result<Self, reqwest::Error> {
        let agents = UserAgentPool::builtin();
        let client = Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .read_timeout(DOWNLOAD_READ_TIMEOUT)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            user_agent: agents.initial().to_string(),
        })
    }

    /// Downloads one file, trying mirrors in order until one succeeds.
    ///
    /// The file lands at `dest_dir/<sanitized file_name>`; a failed mirror's
    /// partial output is removed before the next mirror is tried.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NoMirrors`] for an empty candidate,
    /// [`DownloadError::Cancelled`] when the token fires, and
    /// [`DownloadError::AllMirrorsFailed`] carrying the last mirror's error
    /// otherwise.
    #[instrument(skip(self, candidate, options), fields(mirrors = candidate.urls.len()))]
    pub async fn download(
        &self,
        candidate: &DownloadCandidate,
        dest_dir: &Path,
        file_name: &str,
        options: &DownloadOptions,
    ) -> Result<DownloadedFile, DownloadError> {
        if candidate.is_empty() {
            return Err(DownloadError::NoMirrors {
                file_name: file_name.to_string(),
            });
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| DownloadError::io(dest_dir, source))?;
        let path = dest_dir.join(sanitize_filename(file_name));

        let mut last_error = String::new();
        for (index, url) in candidate.urls.iter().enumerate() {
            debug!(mirror = index + 1, url = %url, "trying download mirror");
            match self.stream_to_file(url, &path, options).await {
                Ok(bytes_downloaded) => {
                    info!(
                        path = %path.display(),
                        bytes = bytes_downloaded,
                        mirror = index + 1,
                        "download complete"
                    );
                    return Ok(DownloadedFile {
                        path,
                        bytes_downloaded,
                        url_used: url.clone(),
                    });
                }
                Err(DownloadError::Cancelled) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(DownloadError::Cancelled);
                }
                // Local IO failures will recur on every mirror.
                Err(error @ DownloadError::Io { .. }) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(error);
                }
                Err(error) => {
                    warn!(mirror = index + 1, error = %error, "mirror failed");
                    last_error = error.to_string();
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }

        Err(DownloadError::AllMirrorsFailed {
            tried: candidate.urls.len(),
            last_error,
        })
    }

    /// Streams one mirror to `path`, reporting progress at a bounded rate.
    async fn stream_to_file(
        &self,
        url: &str,
        path: &Path,
        options: &DownloadOptions,
    ) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(ACCEPT, "*/*")
            .send()
            .await
            .map_err(|error| mirror_error(url, FetchError::from_reqwest(url, error)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(mirror_error(
                url,
                FetchError::http_status(url, status.as_u16()),
            ));
        }

        let total_bytes = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|source| DownloadError::io(path, source))?;
        let mut stream = response.bytes_stream();
        let mut bytes_downloaded: u64 = 0;
        let mut last_report = Instant::now();

        loop {
            let chunk = tokio::select! {
                () = options.cancel.cancelled() => {
                    return Err(DownloadError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|error| mirror_error(url, FetchError::from_reqwest(url, error)))?;

            file.write_all(&chunk)
                .await
                .map_err(|source| DownloadError::io(path, source))?;
            bytes_downloaded += chunk.len() as u64;

            if let Some(progress) = &options.progress
                && last_report.elapsed() >= PROGRESS_INTERVAL
            {
                progress(DownloadProgress {
                    bytes_downloaded,
                    total_bytes,
                });
                last_report = Instant::now();
            }
        }

        file.flush()
            .await
            .map_err(|source| DownloadError::io(path, source))?;

        // Final report so observers always see completion.
        if let Some(progress) = &options.progress {
            progress(DownloadProgress {
                bytes_downloaded,
                total_bytes,
            });
        }

        Ok(bytes_downloaded)
    }
}

fn mirror_error(url: &str, error: FetchError) -> DownloadError {
    DownloadError::Mirror {
        url: url.to_string(),
        message: error.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_download_first_mirror() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new().unwrap();
        let candidate = DownloadCandidate::new(vec![format!("{}/file", server.uri())]);

        let result = downloader
            .download(&candidate, dir.path(), "out.bin", &DownloadOptions::default())
            .await
            .unwrap();

        assert_eq!(result.bytes_downloaded, 7);
        assert_eq!(std::fs::read(&result.path).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_download_falls_back_to_second_mirror() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new().unwrap();
        let candidate = DownloadCandidate::new(vec![
            format!("{}/bad", server.uri()),
            format!("{}/good", server.uri()),
        ]);

        let result = downloader
            .download(&candidate, dir.path(), "out.bin", &DownloadOptions::default())
            .await
            .unwrap();
        assert!(result.url_used.ends_with("/good"));
    }

    #[tokio::test]
    async fn test_all_mirrors_failing_reports_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new().unwrap();
        let candidate = DownloadCandidate::new(vec![
            format!("{}/a", server.uri()),
            format!("{}/b", server.uri()),
        ]);

        let err = downloader
            .download(&candidate, dir.path(), "out.bin", &DownloadOptions::default())
            .await
            .unwrap_err();
        match err {
            DownloadError::AllMirrorsFailed { tried, last_error } => {
                assert_eq!(tried, 2);
                assert!(last_error.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // No partial file left behind.
        assert!(!dir.path().join("out.bin").exists());
    }

    #[tokio::test]
    async fn test_empty_candidate_is_no_mirrors() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new().unwrap();
        let err = downloader
            .download(
                &DownloadCandidate::default(),
                dir.path(),
                "out.bin",
                &DownloadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NoMirrors { .. }));
    }

    #[tokio::test]
    async fn test_progress_reports_completion() {
        let server = MockServer::start().await;
        let body = vec![0u8; 64 * 1024];
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new().unwrap();
        let candidate = DownloadCandidate::new(vec![format!("{}/f", server.uri())]);

        let reports = Arc::new(AtomicU32::new(0));
        let final_bytes = Arc::new(AtomicU32::new(0));
        let reports_in = Arc::clone(&reports);
        let final_in = Arc::clone(&final_bytes);
        let options = DownloadOptions {
            progress: Some(Box::new(move |progress: DownloadProgress| {
                reports_in.fetch_add(1, Ordering::SeqCst);
                #[allow(clippy::cast_possible_truncation)]
                final_in.store(progress.bytes_downloaded as u32, Ordering::SeqCst);
            })),
            cancel: CancellationToken::new(),
        };

        downloader
            .download(&candidate, dir.path(), "out.bin", &options)
            .await
            .unwrap();

        // At least the final completion report fired, with the full size.
        assert!(reports.load(Ordering::SeqCst) >= 1);
        assert_eq!(final_bytes.load(Ordering::SeqCst), 64 * 1024);
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 1024 * 1024])
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new().unwrap();
        let candidate = DownloadCandidate::new(vec![format!("{}/f", server.uri())]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = DownloadOptions {
            progress: None,
            cancel,
        };

        let err = downloader
            .download(&candidate, dir.path(), "out.bin", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
    }

    #[test]
    fn test_progress_percent() {
        let progress = DownloadProgress {
            bytes_downloaded: 50,
            total_bytes: Some(200),
        };
        assert!((progress.percent().unwrap() - 25.0).abs() < f64::EPSILON);

        let unknown = DownloadProgress {
            bytes_downloaded: 50,
            total_bytes: None,
        };
        assert!(unknown.percent().is_none());
    }
}
