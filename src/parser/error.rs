//! Error types for share-link parsing.

use thiserror::Error;

/// Maximum accepted URL length; anything longer is rejected before matching.
pub const MAX_URL_LENGTH: usize = 2048;

/// Errors that can occur while normalizing a share URL.
///
/// Parsing never performs network I/O, so a parse failure is always
/// immediate and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The URL carries no recoverable short code or is not a share link at all.
    #[error("malformed share URL '{url}': {reason}")]
    Malformed {
        /// The offending input, truncated for display.
        url: String,
        /// Why no short code could be recovered.
        reason: String,
    },
}

impl ParseError {
    /// Creates a `Malformed` error, truncating oversized inputs for display.
    #[must_use]
    pub fn malformed(url: &str, reason: &str) -> Self {
        let url = if url.len() > 120 {
            let cut = (0..=120).rev().find(|i| url.is_char_boundary(*i)).unwrap_or(0);
            format!("{}…", &url[..cut])
        } else {
            url.to_string()
        };
        Self::Malformed {
            url,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message_contains_url_and_reason() {
        let err = ParseError::malformed("https://example.com/x", "no short code");
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/x"));
        assert!(msg.contains("no short code"));
    }

    #[test]
    fn test_malformed_truncates_long_urls() {
        let long = format!("https://example.com/{}", "a".repeat(500));
        let err = ParseError::malformed(&long, "too long");
        assert!(err.to_string().len() < 300);
    }
}
