//! Typed failures shared by every extraction strategy.

use thiserror::Error;

use crate::net::FetchError;
use crate::parser::ParseError;

/// Errors an extraction strategy can surface.
///
/// Any step failure aborts the resolve; partial results are never returned.
/// Transport problems arrive here only after the retry executor has spent its
/// budget.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The share URL itself is unusable.
    #[error(transparent)]
    Malformed(#[from] ParseError),

    /// The share does not exist, expired, or lists no files.
    #[error("share not found: {message}")]
    NotFound { message: String },

    /// Upstream demands credentials this strategy does not have.
    #[error("authentication required: {message}")]
    AuthRequired { message: String, status: Option<u16> },

    /// Network-level failure that persisted through retries.
    #[error("transient failure: {message}")]
    Transient { message: String, status: Option<u16> },

    /// Upstream (or the relay) answered but signalled failure in its payload.
    #[error("external service error: {message}")]
    ExternalService { message: String, status: Option<u16> },

    /// The resolve was cancelled by the caller.
    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub(crate) fn external(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::ExternalService {
            message: message.into(),
            status,
        }
    }

    /// The HTTP status associated with this failure, when one exists.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthRequired { status, .. }
            | Self::Transient { status, .. }
            | Self::ExternalService { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<FetchError> for ExtractError {
    /// Maps exhausted transport failures into the strategy taxonomy.
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Timeout { url } => Self::Transient {
                message: format!("timeout requesting {url}"),
                status: None,
            },
            FetchError::Network { url, source } => Self::Transient {
                message: format!("network error requesting {url}: {source}"),
                status: None,
            },
            FetchError::HttpStatus {
                url, status, body, ..
            } => {
                let message = body
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| format!("HTTP {status} from {url}"));
                match status {
                    404 => Self::NotFound { message },
                    401 | 403 => Self::AuthRequired {
                        message,
                        status: Some(status),
                    },
                    // Retryable statuses that outlived the budget stay transient.
                    429 | 500..=599 => Self::Transient {
                        message,
                        status: Some(status),
                    },
                    _ => Self::ExternalService {
                        message,
                        status: Some(status),
                    },
                }
            }
            FetchError::InvalidBody { url, reason } => Self::ExternalService {
                message: format!("invalid response from {url}: {reason}"),
                status: None,
            },
            FetchError::Cancelled => Self::Cancelled,
        }
    }
}
