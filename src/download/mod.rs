//! Streaming downloads with mirror fallback, progress reporting, and
//! cancellation.

mod engine;
mod error;
mod filename;

pub use engine::{DownloadOptions, DownloadProgress, DownloadedFile, Downloader, ProgressFn};
pub use error::DownloadError;
pub use filename::sanitize_filename;
