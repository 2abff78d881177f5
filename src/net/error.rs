//! Transport-level error types shared by every network operation.
//!
//! These errors live below the extraction/orchestration taxonomy: they say
//! what happened on the wire, not what it means for the share. Conversion
//! into caller-facing error kinds happens at the retry-executor and
//! orchestrator boundaries, so code above those layers never sees a raw
//! `reqwest` error.

use thiserror::Error;

/// Errors produced by a single HTTP operation.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure (DNS, connection refused, reset, TLS).
    #[error("network error requesting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Connect or read timeout elapsed.
    #[error("timeout requesting {url}")]
    Timeout { url: String },

    /// Upstream answered with a non-success HTTP status.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        url: String,
        status: u16,
        /// Raw `Retry-After` header value, when the server sent one.
        retry_after: Option<String>,
        /// Truncated response body, kept for failure classification.
        body: Option<String>,
    },

    /// Upstream answered 200 but the payload did not decode.
    #[error("invalid response body from {url}: {reason}")]
    InvalidBody { url: String, reason: String },

    /// The operation was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,
}

/// Longest body excerpt retained on an error status.
const MAX_BODY_EXCERPT: usize = 512;

impl FetchError {
    /// Wraps a `reqwest` error, distinguishing timeouts from other
    /// network-level failures.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error without header or body context.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
            body: None,
        }
    }

    /// Creates an HTTP status error carrying the `Retry-After` header and a
    /// truncated body excerpt.
    pub fn http_status_with_context(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
        body: Option<String>,
    ) -> Self {
        let body = body.map(|text| {
            let mut excerpt = text;
            if excerpt.len() > MAX_BODY_EXCERPT {
                let cut = (0..=MAX_BODY_EXCERPT)
                    .rev()
                    .find(|index| excerpt.is_char_boundary(*index))
                    .unwrap_or(0);
                excerpt.truncate(cut);
            }
            excerpt
        });
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
            body,
        }
    }

    /// Creates an invalid-body error for undecodable 200 responses.
    pub fn invalid_body(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBody {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// The HTTP status code, when this error carries one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The retained body excerpt, when this error carries one.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    /// Whether the retry executor may re-attempt after this failure.
    ///
    /// Retryable: connection errors, timeouts, and HTTP 429/500/502/503/504.
    /// Everything else (other 4xx, undecodable bodies, cancellation)
    /// propagates immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Network { source, .. } => !is_tls_error(source),
            Self::HttpStatus { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            Self::InvalidBody { .. } | Self::Cancelled => false,
        }
    }
}

/// TLS and certificate failures are configuration problems, not transient
/// network weather.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let text = error.to_string().to_lowercase();
    text.contains("certificate")
        || text.contains("tls")
        || text.contains("ssl")
        || text.contains("handshake")
}
