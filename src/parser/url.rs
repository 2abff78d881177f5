//! Short-code extraction and domain canonicalization for share URLs.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};
use url::Url;

use super::error::{MAX_URL_LENGTH, ParseError};

/// Path-segment form: `…/s/<code>`. Tried first.
#[allow(clippy::expect_used)]
static PATH_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/s/([A-Za-z0-9_-]+)").expect("path short-code regex is valid")
});

/// Query-parameter form: `…surl=<code>`. Tried second.
#[allow(clippy::expect_used)]
static QUERY_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"surl=([A-Za-z0-9_-]+)").expect("query short-code regex is valid")
});

/// Share URLs embedded in free text.
#[allow(clippy::expect_used)]
static EMBEDDED_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"']+"#).expect("embedded URL regex is valid")
});

/// Mirror domains known to serve the same share infrastructure.
///
/// Different mirror domains are NOT interchangeable at download time, so
/// canonicalization preserves the matched domain rather than folding all
/// variants into one.
const KNOWN_DOMAINS: &[&str] = &[
    "terabox.com",
    "terabox.app",
    "1024terabox.com",
    "1024tera.com",
    "terasharelink.com",
    "terafileshare.com",
    "teraboxapp.com",
    "freeterabox.com",
    "nephobox.com",
];

/// A normalized share link: the original URL, its canonical form, the domain
/// variant it came from, and the short code identifying the share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    /// The URL exactly as supplied by the caller.
    pub raw: String,
    /// Canonical URL preserving the original domain variant.
    pub canonical: String,
    /// Lowercased domain without a `www.` prefix.
    pub domain: String,
    /// The opaque share identifier; cache and identity key.
    pub short_code: String,
}

/// Extracts just the short code from a URL, if one is recoverable.
///
/// Path-segment form (`/s/<code>`) wins over query-parameter form
/// (`surl=<code>`) when both are present.
#[must_use]
pub fn short_code(url: &str) -> Option<String> {
    PATH_CODE
        .captures(url)
        .or_else(|| QUERY_CODE.captures(url))
        .map(|captures| captures[1].to_string())
}

/// Normalizes an arbitrary share URL into a [`ShareLink`].
///
/// Known mirror domains canonicalize to `https://<domain>/s/<code>`; an
/// unrecognized domain falls back to the generic sharing-link form. No
/// network call is ever made.
///
/// # Errors
///
/// Returns [`ParseError::Malformed`] when the URL is oversized, has no
/// parseable host, or carries no recoverable short code.
#[tracing::instrument(level = "debug", skip(url), fields(url_len = url.len()))]
pub fn normalize(url: &str) -> Result<ShareLink, ParseError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(ParseError::malformed(url, "empty input"));
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return Err(ParseError::malformed(trimmed, "URL exceeds maximum length"));
    }

    let code = short_code(trimmed)
        .ok_or_else(|| ParseError::malformed(trimmed, "no short code in path or query"))?;

    let host = Url::parse(trimmed)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        .ok_or_else(|| ParseError::malformed(trimmed, "no parseable host"))?;
    let domain = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let canonical = if KNOWN_DOMAINS.contains(&domain.as_str()) {
        format!("https://{domain}/s/{code}")
    } else {
        // Unrecognized mirror: generic sharing-link form understood upstream.
        trace!(domain = %domain, "unknown domain, using generic sharing-link form");
        format!("https://www.terabox.app/sharing/link?surl={code}")
    };

    debug!(short_code = %code, domain = %domain, "normalized share URL");

    Ok(ShareLink {
        raw: trimmed.to_string(),
        canonical,
        domain,
        short_code: code,
    })
}

/// Finds every normalizable share link embedded in free text, in order of
/// appearance, deduplicated by short code.
#[must_use]
pub fn extract_share_links(text: &str) -> Vec<ShareLink> {
    let mut seen = Vec::new();
    let mut links = Vec::new();
    for found in EMBEDDED_URL.find_iter(text) {
        let candidate = found.as_str().trim_end_matches(['.', ',', ')', ']']);
        if let Ok(link) = normalize(candidate) {
            if !seen.contains(&link.short_code) {
                seen.push(link.short_code.clone());
                links.push(link);
            }
        }
    }
    links
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_form() {
        let link = normalize("https://terasharelink.com/s/1abcDEF").unwrap();
        assert_eq!(link.short_code, "1abcDEF");
        assert_eq!(link.domain, "terasharelink.com");
        assert_eq!(link.canonical, "https://terasharelink.com/s/1abcDEF");
    }

    #[test]
    fn test_normalize_query_form() {
        let link = normalize("https://www.terabox.app/sharing/link?surl=1abcDEF").unwrap();
        assert_eq!(link.short_code, "1abcDEF");
        assert_eq!(link.domain, "terabox.app");
        assert_eq!(link.canonical, "https://terabox.app/s/1abcDEF");
    }

    #[test]
    fn test_path_form_wins_over_query_form() {
        let link = normalize("https://terabox.com/s/pathcode?surl=querycode").unwrap();
        assert_eq!(link.short_code, "pathcode");
    }

    #[test]
    fn test_same_code_across_forms_and_domains() {
        // The testable property: every supported variant yields the same code.
        let urls = [
            "https://terabox.com/s/1xyz",
            "https://www.terabox.com/s/1xyz",
            "https://1024terabox.com/s/1xyz",
            "https://www.1024tera.com/s/1xyz",
            "https://terafileshare.com/s/1xyz",
            "https://teraboxapp.com/sharing/link?surl=1xyz",
            "https://freeterabox.com/s/1xyz",
            "https://nephobox.com/sharing/link?surl=1xyz",
        ];
        for url in urls {
            assert_eq!(normalize(url).unwrap().short_code, "1xyz", "for {url}");
        }
    }

    #[test]
    fn test_known_domain_preserved() {
        let a = normalize("https://www.freeterabox.com/s/1q").unwrap();
        let b = normalize("https://nephobox.com/s/1q").unwrap();
        assert_eq!(a.canonical, "https://freeterabox.com/s/1q");
        assert_eq!(b.canonical, "https://nephobox.com/s/1q");
        assert_ne!(a.canonical, b.canonical);
    }

    #[test]
    fn test_unknown_domain_uses_generic_form() {
        let link = normalize("https://mirror.example.net/s/1abc").unwrap();
        assert_eq!(
            link.canonical,
            "https://www.terabox.app/sharing/link?surl=1abc"
        );
    }

    #[test]
    fn test_no_short_code_is_malformed() {
        let err = normalize("https://terabox.com/about").unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn test_not_a_url_is_malformed() {
        assert!(normalize("not a url at all").is_err());
        assert!(normalize("").is_err());
        assert!(normalize("   ").is_err());
    }

    #[test]
    fn test_oversized_url_is_malformed() {
        let url = format!("https://terabox.com/s/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(normalize(&url).is_err());
    }

    #[test]
    fn test_short_code_helper() {
        assert_eq!(short_code("https://x.com/s/ab_c-9"), Some("ab_c-9".to_string()));
        assert_eq!(short_code("https://x.com/other"), None);
    }

    #[test]
    fn test_extract_share_links_from_text() {
        let text = "first https://terabox.com/s/1one, then \
                    https://freeterabox.com/s/1two and a dup https://terabox.com/s/1one";
        let links = extract_share_links(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].short_code, "1one");
        assert_eq!(links[1].short_code, "1two");
    }

    #[test]
    fn test_extract_ignores_non_share_urls() {
        let links = extract_share_links("see https://example.com/docs for details");
        assert!(links.is_empty());
    }
}
