//! Error types for the download engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while downloading a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The candidate carried no mirror URLs at all.
    #[error("no download URLs available for '{file_name}'")]
    NoMirrors { file_name: String },

    /// Every mirror was tried and none delivered the file.
    #[error("all {tried} download URL(s) failed; last error: {last_error}")]
    AllMirrorsFailed { tried: usize, last_error: String },

    /// One mirror failed; the engine folds these into `AllMirrorsFailed`.
    #[error("{url}: {message}")]
    Mirror { url: String, message: String },

    /// Local filesystem failure while writing the payload.
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The download was cancelled mid-transfer.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub(super) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
