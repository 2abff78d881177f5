//! Shared HTTP client construction and response policy.
//!
//! Centralizes networking defaults so every component stays consistent on
//! timeouts, compression, and user-agent handling, and converts error
//! responses into [`FetchError`] while the body is still readable.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use tracing::{debug, warn};

use super::error::FetchError;

/// Default connect timeout for all requests.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout for all requests.
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Maximum honored `Retry-After` value; anything larger is capped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Builds a reqwest client with the project's shared policy.
///
/// # Errors
///
/// Returns the underlying `reqwest` error when client construction fails.
pub fn build_http_client(
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
    user_agent: &str,
    cookie_jar: Option<Arc<Jar>>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .user_agent(user_agent.to_string())
        .gzip(true);

    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }

    builder.build()
}

/// Checks a response's status, consuming the body into the error on failure
/// so callers can classify rate-limit and authorization messages.
///
/// # Errors
///
/// Returns [`FetchError::HttpStatus`] for any non-2xx status, carrying the
/// `Retry-After` header value and a truncated body excerpt when available.
pub async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let body = response.text().await.ok();

    debug!(url = %url, status = status.as_u16(), "error status from upstream");
    Err(FetchError::http_status_with_context(
        url,
        status.as_u16(),
        retry_after,
        body,
    ))
}

/// Parses a `Retry-After` header value into a duration.
///
/// Accepts integer seconds or an RFC 7231 HTTP-date; values are capped at one
/// hour and dates in the past collapse to zero. Unparseable values return
/// `None`.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(instant) = httpdate::parse_http_date(value) {
        return match instant.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => {
                if duration > MAX_RETRY_AFTER {
                    warn!(
                        delay_secs = duration.as_secs(),
                        "Retry-After date exceeds maximum, capping"
                    );
                    Some(MAX_RETRY_AFTER)
                } else {
                    Some(duration)
                }
            }
            // Date already passed.
            Err(_) => Some(Duration::ZERO),
        };
    }

    None
}
