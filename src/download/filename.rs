//! File-name sanitization for downloaded payloads.

/// Longest file name written to disk.
const MAX_FILENAME_LEN: usize = 200;

/// Name used when sanitization leaves nothing usable.
const FALLBACK_NAME: &str = "downloaded_file";

/// Cleans an upstream-supplied file name for safe local use.
///
/// Path separators and control characters become underscores, leading and
/// trailing dots/spaces are trimmed, and overlong names are truncated while
/// keeping their extension.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();

    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    if trimmed.len() <= MAX_FILENAME_LEN {
        return trimmed.to_string();
    }

    // Keep the extension when truncating.
    match trimmed.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.len() < 16 => {
            let budget = MAX_FILENAME_LEN.saturating_sub(ext.len() + 1);
            let cut = (0..=budget.min(stem.len()))
                .rev()
                .find(|i| stem.is_char_boundary(*i))
                .unwrap_or(0);
            format!("{}.{ext}", &stem[..cut])
        }
        _ => {
            let cut = (0..=MAX_FILENAME_LEN)
                .rev()
                .find(|i| trimmed.is_char_boundary(*i))
                .unwrap_or(0);
            trimmed[..cut].to_string()
        }
    }
}
