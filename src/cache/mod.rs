//! File-backed TTL cache for resolved share payloads.
//!
//! One JSON file per canonical short code, each wrapping the payload with
//! metadata (creation time, ttl, source URL). Entries are written to a
//! temporary file in the cache directory and atomically persisted into
//! place, so a crash can never leave a partial entry visible to readers.
//! Reads past the ttl are misses and make the stale file eligible for
//! purge; concurrent writes to one key are last-writer-wins.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::parser;

/// Prefix for cache entry files; everything else in the directory is ignored.
const ENTRY_PREFIX: &str = "share_";

/// Cache format version stamped into every entry.
const CACHE_VERSION: &str = "1.0";

/// Errors from cache write and maintenance operations.
///
/// Read-path problems (missing file, undecodable entry) are deliberately
/// treated as misses, not errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry serialization failed: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMetadata {
    /// Unix seconds at creation, fractional.
    created_at: f64,
    ttl_secs: u64,
    source_url: String,
    short_code: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry<T> {
    metadata: EntryMetadata,
    payload: T,
}

/// A successful cache lookup: the payload plus how old it is.
#[derive(Debug, Clone)]
pub struct CacheHit<T> {
    pub payload: T,
    /// Entry age at lookup time; always less than the ttl.
    pub age: Duration,
    /// The key the entry was stored under.
    pub key: String,
}

/// Aggregate cache contents for operational visibility.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: u64,
}

/// TTL-keyed store of previously resolved payloads.
#[derive(Debug)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    /// Opens (and creates, if needed) a cache rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, enabled: bool) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        info!(
            dir = %dir.display(),
            ttl_secs = ttl.as_secs(),
            enabled,
            "response cache ready"
        );
        Ok(Self { dir, ttl, enabled })
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Derives the cache key for a URL: the short code when one is
    /// recoverable, otherwise a stable hash of the URL itself so every URL
    /// still maps to a key.
    #[must_use]
    pub fn key(url: &str) -> String {
        if let Some(code) = parser::short_code(url) {
            return code;
        }
        let digest = Sha256::digest(url.as_bytes());
        let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        format!("hash_{hex}")
    }

    /// Looks up the payload cached for `url`.
    ///
    /// Returns `None` when caching is disabled, no entry exists, the entry
    /// is expired (the stale file is removed), or the entry cannot be
    /// decoded. A hit always has `age < ttl`.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, url: &str) -> Option<CacheHit<T>> {
        if !self.enabled {
            return None;
        }

        let key = Self::key(url);
        let path = self.entry_path(&key);
        let raw = std::fs::read_to_string(&path).ok()?;

        let entry: Entry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "unreadable cache entry, ignoring");
                return None;
            }
        };

        let age = age_since(entry.metadata.created_at);
        if age >= self.ttl {
            debug!(key = %key, age_secs = age.as_secs(), "cache entry expired");
            let _ = std::fs::remove_file(&path);
            return None;
        }

        debug!(key = %key, age_secs = age.as_secs(), "cache hit");
        Some(CacheHit {
            payload: entry.payload,
            age,
            key,
        })
    }

    /// Stores `payload` for `url`, replacing any previous entry.
    ///
    /// The write goes to a temporary file in the cache directory first and is
    /// atomically persisted into place.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when serialization or the filesystem write
    /// fails. Disabled caches return `Ok` without writing.
    pub fn put<T: Serialize>(&self, url: &str, payload: &T) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        let key = Self::key(url);
        let entry = Entry {
            metadata: EntryMetadata {
                created_at: now_secs(),
                ttl_secs: self.ttl.as_secs(),
                source_url: url.to_string(),
                short_code: key.clone(),
                version: CACHE_VERSION.to_string(),
            },
            payload,
        };
        let body =
            serde_json::to_vec_pretty(&entry).map_err(|source| CacheError::Serialize { source })?;

        let path = self.entry_path(&key);
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|source| {
            CacheError::Io {
                path: self.dir.clone(),
                source,
            }
        })?;
        temp.write_all(&body).map_err(|source| CacheError::Io {
            path: temp.path().to_path_buf(),
            source,
        })?;
        temp.persist(&path).map_err(|error| CacheError::Io {
            path: path.clone(),
            source: error.error,
        })?;

        debug!(key = %key, path = %path.display(), "cache entry written");
        Ok(())
    }

    /// Removes every expired entry and reports how many were purged.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when the cache directory cannot be listed;
    /// individually unreadable entries are skipped, not fatal.
    pub fn cleanup(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_files()? {
            match self.entry_age(&path) {
                Some(age) if age >= self.ttl => {
                    if std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                        debug!(path = %path.display(), "purged expired cache entry");
                    }
                }
                _ => {}
            }
        }
        if removed > 0 {
            info!(removed, "cache cleanup finished");
        }
        Ok(removed)
    }

    /// Removes one entry by key, or every entry when `key` is `None`.
    /// Returns how many files were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when the cache directory cannot be listed.
    pub fn clear(&self, key: Option<&str>) -> Result<usize, CacheError> {
        match key {
            Some(key) => {
                let path = self.entry_path(key);
                if path.exists() && std::fs::remove_file(&path).is_ok() {
                    Ok(1)
                } else {
                    Ok(0)
                }
            }
            None => {
                let mut removed = 0;
                for path in self.entry_files()? {
                    if std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
        }
    }

    /// Counts entries and sizes for operational visibility.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when the cache directory cannot be listed.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for path in self.entry_files()? {
            stats.total_entries += 1;
            if let Ok(meta) = std::fs::metadata(&path) {
                stats.total_size_bytes += meta.len();
            }
            match self.entry_age(&path) {
                Some(age) if age < self.ttl => stats.valid_entries += 1,
                _ => stats.expired_entries += 1,
            }
        }
        Ok(stats)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{ENTRY_PREFIX}{safe}.json"))
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let reader = std::fs::read_dir(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        Ok(reader
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(ENTRY_PREFIX) && name.ends_with(".json"))
            })
            .collect())
    }

    /// Age of the entry at `path`, or `None` when it cannot be read.
    fn entry_age(&self, path: &Path) -> Option<Duration> {
        let raw = std::fs::read_to_string(path).ok()?;
        let entry: Entry<serde_json::Value> = serde_json::from_str(&raw).ok()?;
        Some(age_since(entry.metadata.created_at))
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}

fn age_since(created_at: f64) -> Duration {
    Duration::from_secs_f64((now_secs() - created_at).max(0.0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn cache_in(dir: &TempDir, ttl: Duration) -> ResponseCache {
        ResponseCache::new(dir.path(), ttl, true).unwrap()
    }

    #[test]
    fn test_key_prefers_short_code() {
        assert_eq!(ResponseCache::key("https://terabox.com/s/1abc"), "1abc");
        assert_eq!(
            ResponseCache::key("https://x.com/sharing/link?surl=1def"),
            "1def"
        );
    }

    #[test]
    fn test_key_falls_back_to_stable_hash() {
        let key_a = ResponseCache::key("https://example.com/no-code");
        let key_b = ResponseCache::key("https://example.com/no-code");
        let key_c = ResponseCache::key("https://example.com/other");
        assert!(key_a.starts_with("hash_"));
        assert_eq!(key_a, key_b);
        assert_ne!(key_a, key_c);
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(3600));
        let payload = json!({"file_name": "a.mp4", "direct_link": "https://d/1"});

        cache.put("https://terabox.com/s/1abc", &payload).unwrap();
        let hit: CacheHit<serde_json::Value> = cache.get("https://terabox.com/s/1abc").unwrap();
        assert_eq!(hit.payload, payload);
        assert_eq!(hit.key, "1abc");
        assert!(hit.age < Duration::from_secs(3600));
    }

    #[test]
    fn test_get_by_other_url_form_hits_same_entry() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(3600));
        cache
            .put("https://terabox.com/s/1abc", &json!({"n": 1}))
            .unwrap();
        let hit: Option<CacheHit<serde_json::Value>> =
            cache.get("https://freeterabox.com/sharing/link?surl=1abc");
        assert!(hit.is_some());
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, Duration::ZERO);
        cache
            .put("https://terabox.com/s/1abc", &json!({"n": 1}))
            .unwrap();

        let miss: Option<CacheHit<serde_json::Value>> = cache.get("https://terabox.com/s/1abc");
        assert!(miss.is_none());
        // The stale file was removed on read.
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn test_cleanup_reports_removed_count() {
        let dir = TempDir::new().unwrap();
        let expiring = cache_in(&dir, Duration::ZERO);
        expiring.put("https://terabox.com/s/1a", &json!({})).unwrap();
        expiring.put("https://terabox.com/s/1b", &json!({})).unwrap();

        assert_eq!(expiring.cleanup().unwrap(), 2);
        assert_eq!(expiring.cleanup().unwrap(), 0);
    }

    #[test]
    fn test_cleanup_keeps_valid_entries() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(3600));
        cache.put("https://terabox.com/s/1a", &json!({})).unwrap();
        assert_eq!(cache.cleanup().unwrap(), 0);
        assert_eq!(cache.stats().unwrap().valid_entries, 1);
    }

    #[test]
    fn test_clear_single_and_all() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(3600));
        cache.put("https://terabox.com/s/1a", &json!({})).unwrap();
        cache.put("https://terabox.com/s/1b", &json!({})).unwrap();

        assert_eq!(cache.clear(Some("1a")).unwrap(), 1);
        assert_eq!(cache.clear(Some("1a")).unwrap(), 0);
        assert_eq!(cache.clear(None).unwrap(), 1);
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn test_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(3600));
        cache
            .put("https://terabox.com/s/1a", &json!({"v": 1}))
            .unwrap();
        cache
            .put("https://terabox.com/s/1a", &json!({"v": 2}))
            .unwrap();

        let hit: CacheHit<serde_json::Value> = cache.get("https://terabox.com/s/1a").unwrap();
        assert_eq!(hit.payload["v"], 2);
        assert_eq!(cache.stats().unwrap().total_entries, 1);
    }

    #[test]
    fn test_disabled_cache_never_hits_or_writes() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), Duration::from_secs(3600), false).unwrap();
        cache.put("https://terabox.com/s/1a", &json!({})).unwrap();
        let miss: Option<CacheHit<serde_json::Value>> = cache.get("https://terabox.com/s/1a");
        assert!(miss.is_none());
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn test_corrupt_entry_is_miss_not_error() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(3600));
        std::fs::write(dir.path().join("share_1bad.json"), b"{not json").unwrap();

        let miss: Option<CacheHit<serde_json::Value>> = cache.get("https://terabox.com/s/1bad");
        assert!(miss.is_none());
    }

    #[test]
    fn test_key_sanitized_for_filename() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(3600));
        // Hash-fallback keys contain only safe characters already, but a
        // hostile short code must not escape the cache directory.
        let path = cache.entry_path("../../etc/passwd");
        assert!(path.starts_with(dir.path()));
        assert!(!path.to_string_lossy().contains(".."));
    }
}
