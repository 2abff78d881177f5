//! Per-domain pacing for bulk operations.
//!
//! Bulk resolution issues many lookups against the same upstream; a minimum
//! inter-request delay per domain keeps the client from hammering one host
//! while requests to unrelated domains proceed immediately.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum delay between requests to the same domain.
///
/// Shared across tasks via `Arc`; per-domain timing lives behind its own
/// `Mutex` so the `DashMap` shard lock is never held across an await.
#[derive(Debug)]
pub struct DomainPacer {
    delay: Duration,
    domains: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl DomainPacer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            domains: DashMap::new(),
        }
    }

    /// A pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until the domain's pacing window has elapsed, then claims the
    /// window for this request. First request per domain never waits.
    pub async fn acquire(&self, url: &str) {
        if self.delay.is_zero() {
            return;
        }

        let domain = domain_of(url);
        let slot = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut last = slot.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                let wait = self.delay - elapsed;
                debug!(domain = %domain, wait_ms = wait.as_millis(), "pacing request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Lowercased host of a URL, or `"unknown"` so unparseable URLs still pace.
fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let pacer = DomainPacer::new(Duration::from_secs(1));
        let start = Instant::now();
        pacer.acquire("https://example.com/a").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_domain_waits() {
        let pacer = DomainPacer::new(Duration::from_secs(1));
        let start = Instant::now();
        pacer.acquire("https://example.com/a").await;
        pacer.acquire("https://example.com/b").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_domains_do_not_wait() {
        let pacer = DomainPacer::new(Duration::from_secs(1));
        pacer.acquire("https://a.com/x").await;
        let start = Instant::now();
        pacer.acquire("https://b.com/x").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_waits() {
        let pacer = DomainPacer::disabled();
        let start = Instant::now();
        for _ in 0..5 {
            pacer.acquire("https://example.com/x").await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
