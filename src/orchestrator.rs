//! Top-level request orchestration: cache, credential rotation, and the
//! commercial metadata API.
//!
//! [`RequestOrchestrator`] is the entry point presentation layers call. It
//! composes URL normalization, the response cache, the credential pool, and
//! the retry executor, and classifies every upstream response into the typed
//! error taxonomy; callers never see raw transport errors or internal
//! state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheError, ResponseCache};
use crate::config::Config;
use crate::credentials::{CredentialPool, LeasedCredential};
use crate::extract::{ExtractError, Extractor, StrategyKind, build_extractor};
use crate::manifest::{FilePayload, ShareManifest};
use crate::net::{DomainPacer, FetchError, RetryExecutor, RetryPolicy, build_http_client, check_status};
use crate::parser::{self, ParseError, ShareLink};
use crate::user_agent::UserAgentPool;

/// Errors surfaced by the orchestrator.
///
/// Every variant carries a stable message, and [`ResolveError::status`]
/// exposes the upstream status code when one exists, so a presentation layer
/// can branch without string matching.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The URL itself is unusable; failed before any network call.
    #[error(transparent)]
    Malformed(#[from] ParseError),

    /// Upstream says the share does not exist or has expired.
    #[error("file not found or link expired: {url}")]
    NotFound { url: String },

    /// The pool has no credentials configured at all.
    #[error("no credentials configured; add at least one API credential")]
    NoCredentials,

    /// Every credential was tried and none could complete the request.
    #[error("all credentials exhausted after {attempts} request(s)")]
    AllCredentialsExhausted { attempts: u32 },

    /// Upstream answered but its payload signalled failure.
    #[error("external service error: {message}")]
    ExternalService { message: String, status: Option<u16> },

    /// A strategy-level failure, passed through unchanged.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The resolve was cancelled by the caller.
    #[error("resolve cancelled")]
    Cancelled,
}

impl ResolveError {
    /// The upstream HTTP status associated with this failure, when known.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::ExternalService { status, .. } => *status,
            Self::Extract(error) => error.status(),
            _ => None,
        }
    }
}

/// Where a resolved payload came from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum CacheStatus {
    /// Freshly fetched from upstream.
    Miss,
    /// Served from the response cache.
    Hit {
        /// Entry age at lookup time.
        age: Duration,
    },
}

impl CacheStatus {
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// A resolved file with its observability metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedFile {
    pub payload: FilePayload,
    pub source_url: String,
    /// Which credential performed the request; `None` on cache hits.
    pub used_credential_id: Option<String>,
    pub cache: CacheStatus,
}

/// The top-level entry point composing normalization, cache, credential
/// rotation, and response classification.
pub struct RequestOrchestrator {
    config: Config,
    client: Client,
    pool: Arc<CredentialPool>,
    cache: ResponseCache,
    pacer: DomainPacer,
    agents: UserAgentPool,
    cancel: CancellationToken,
}

impl RequestOrchestrator {
    /// Builds an orchestrator from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the cache directory cannot be prepared.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[allow(clippy::expect_used)]
    pub fn new(config: Config) -> Result<Self, CacheError> {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Builds an orchestrator whose in-flight work aborts when `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the cache directory cannot be prepared.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[allow(clippy::expect_used)]
    pub fn with_cancellation(
        config: Config,
        cancel: CancellationToken,
    ) -> Result<Self, CacheError> {
        let agents = UserAgentPool::new(config.network.user_agents.clone());
        let client = build_http_client(
            config.network.connect_timeout_secs,
            config.network.read_timeout_secs,
            agents.initial(),
            None,
        )
        .expect("failed to build HTTP client with static configuration");
        let cache = ResponseCache::new(
            config.cache.directory.clone(),
            config.cache.ttl(),
            config.cache.enabled,
        )?;
        let pool = Arc::new(CredentialPool::new(config.api.credentials.clone()));
        let pacer = DomainPacer::new(config.network.pacing_delay());

        Ok(Self {
            config,
            client,
            pool,
            cache,
            pacer,
            agents,
            cancel,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves a share URL through the commercial metadata API, consulting
    /// the response cache first.
    ///
    /// On a miss (or with `force_refresh`) the credential loop runs up to
    /// `credentials × max_retries_per_key` upstream requests, rotating away
    /// from rate-limited and rejected credentials, and writes the validated
    /// payload back to the cache.
    ///
    /// # Errors
    ///
    /// Returns the typed [`ResolveError`] taxonomy; see its variants.
    #[instrument(skip(self))]
    pub async fn resolve_with_cache(
        &self,
        url: &str,
        force_refresh: bool,
    ) -> Result<ResolvedFile, ResolveError> {
        let link = parser::normalize(url)?;

        if !force_refresh
            && let Some(hit) = self.cache.get::<FilePayload>(url)
        {
            info!(
                key = %hit.key,
                age_secs = hit.age.as_secs(),
                "serving resolved payload from cache"
            );
            return Ok(ResolvedFile {
                payload: hit.payload,
                source_url: url.to_string(),
                used_credential_id: None,
                cache: CacheStatus::Hit { age: hit.age },
            });
        }

        if self.pool.is_empty() {
            return Err(ResolveError::NoCredentials);
        }

        #[allow(clippy::cast_possible_truncation)]
        let max_requests = (self.pool.len() as u32) * self.config.api.max_retries_per_key;
        let requests = Arc::new(AtomicU32::new(0));
        // Each credential's requests are bounded by max_retries_per_key:
        // one initial attempt plus (max_retries_per_key - 1) retries.
        let executor = RetryExecutor::new(
            RetryPolicy::new(
                self.config.api.max_retries_per_key.saturating_sub(1),
                self.config.network.base_delay(),
            ),
            self.agents.clone(),
            self.cancel.clone(),
        );

        while requests.load(Ordering::SeqCst) < max_requests {
            let Some(lease) = self.pool.acquire() else {
                return Err(ResolveError::AllCredentialsExhausted {
                    attempts: requests.load(Ordering::SeqCst),
                });
            };

            let started = std::time::Instant::now();
            match self
                .fetch_metadata(&executor, &link, &lease, &requests)
                .await
            {
                Ok(value) => {
                    self.pool.mark_success(&lease.id, started.elapsed());
                    let payload = FilePayload::from_api_value(&value)
                        .filter(FilePayload::is_usable)
                        .ok_or_else(|| ResolveError::ExternalService {
                            message: "no valid file data in response".to_string(),
                            status: None,
                        })?;

                    if let Err(error) = self.cache.put(url, &payload) {
                        warn!(error = %error, "cache write failed, continuing");
                    }
                    info!(
                        credential = %lease.id,
                        file = %payload.file_name,
                        "share resolved"
                    );
                    return Ok(ResolvedFile {
                        payload,
                        source_url: url.to_string(),
                        used_credential_id: Some(lease.id),
                        cache: CacheStatus::Miss,
                    });
                }
                Err(FetchError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(error) => {
                    let status = error.status();
                    let message = error
                        .body()
                        .filter(|body| !body.trim().is_empty())
                        .map_or_else(|| error.to_string(), ToString::to_string);

                    match status {
                        Some(429) => {
                            debug!(credential = %lease.id, "rate limited, rotating");
                            self.pool.mark_failure(&lease.id, &message, status);
                        }
                        Some(401 | 403) => {
                            debug!(credential = %lease.id, status, "credential rejected, rotating");
                            self.pool.mark_failure(&lease.id, &message, status);
                        }
                        // The URL is the problem, not the credential.
                        Some(400) => {
                            return Err(ResolveError::Malformed(ParseError::malformed(
                                url,
                                "rejected by upstream (HTTP 400)",
                            )));
                        }
                        Some(404) => {
                            return Err(ResolveError::NotFound {
                                url: url.to_string(),
                            });
                        }
                        _ => {
                            debug!(credential = %lease.id, status = ?status, "request failed, rotating");
                            self.pool.mark_failure(&lease.id, &message, status);
                        }
                    }
                }
            }
        }

        Err(ResolveError::AllCredentialsExhausted {
            attempts: requests.load(Ordering::SeqCst),
        })
    }

    /// Resolves many URLs sequentially with per-domain pacing between calls.
    pub async fn resolve_all(&self, urls: &[String]) -> Vec<Result<ResolvedFile, ResolveError>> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            self.pacer.acquire(&self.config.api.endpoint).await;
            results.push(self.resolve_with_cache(url, false).await);
        }
        results
    }

    /// Routes a resolve through one of the extraction strategies instead of
    /// the commercial API.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Malformed`] for unusable URLs and the
    /// strategy's own [`ExtractError`] otherwise.
    #[instrument(skip(self), fields(strategy = %kind))]
    pub async fn resolve_with_strategy(
        &self,
        url: &str,
        kind: StrategyKind,
    ) -> Result<ShareManifest, ResolveError> {
        let link = parser::normalize(url)?;
        let extractor = self.extractor(kind)?;
        Ok(extractor.resolve(&link).await?)
    }

    /// Builds a strategy extractor sharing this orchestrator's configuration
    /// and cancellation token.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the strategy cannot be constructed.
    pub fn extractor(&self, kind: StrategyKind) -> Result<Box<dyn Extractor>, ExtractError> {
        build_extractor(kind, &self.config, self.cancel.clone())
    }

    /// One credentialed call to the commercial metadata endpoint, retried
    /// per the executor's budget. Counts every network request issued.
    async fn fetch_metadata(
        &self,
        executor: &RetryExecutor,
        link: &ShareLink,
        lease: &LeasedCredential,
        requests: &Arc<AtomicU32>,
    ) -> Result<serde_json::Value, FetchError> {
        let endpoint = format!("{}/url", self.config.api.endpoint.trim_end_matches('/'));
        let canonical = link.canonical.clone();
        let secret = lease.secret.clone();
        let api_host = self.config.api.api_host.clone();
        let client = self.client.clone();
        let requests = Arc::clone(requests);

        executor
            .execute("commercial-metadata", move |attempt| {
                let client = client.clone();
                let endpoint = endpoint.clone();
                let canonical = canonical.clone();
                let secret = secret.clone();
                let api_host = api_host.clone();
                let requests = Arc::clone(&requests);
                async move {
                    requests.fetch_add(1, Ordering::SeqCst);
                    let response = client
                        .get(&endpoint)
                        .query(&[("url", canonical.as_str())])
                        .header("X-RapidAPI-Key", secret)
                        .header("X-RapidAPI-Host", api_host)
                        .header(USER_AGENT, attempt.user_agent)
                        .header(ACCEPT, "application/json")
                        .send()
                        .await
                        .map_err(|error| FetchError::from_reqwest(&endpoint, error))?;
                    let response = check_status(response).await?;
                    response
                        .json()
                        .await
                        .map_err(|error| FetchError::invalid_body(&endpoint, error.to_string()))
                }
            })
            .await
    }
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("credentials", &self.pool.len())
            .field("cache_enabled", &self.cache.is_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn orchestrator_with(credentials: Vec<String>, dir: &TempDir) -> RequestOrchestrator {
        let mut config = Config::default();
        config.api.credentials = credentials;
        config.cache.directory = dir.path().to_path_buf();
        RequestOrchestrator::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_malformed_url_fails_before_network() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator_with(vec!["k".to_string()], &dir);
        let err = orchestrator
            .resolve_with_cache("https://unknown.example.com/about", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));
        assert!(err.status().is_none());
    }

    #[tokio::test]
    async fn test_empty_pool_fails_immediately() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator_with(Vec::new(), &dir);
        let err = orchestrator
            .resolve_with_cache("https://terabox.com/s/1abc", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoCredentials));
    }

    #[test]
    fn test_resolve_error_status_codes() {
        assert_eq!(
            ResolveError::NotFound {
                url: "u".to_string()
            }
            .status(),
            Some(404)
        );
        assert_eq!(
            ResolveError::ExternalService {
                message: "m".to_string(),
                status: Some(502)
            }
            .status(),
            Some(502)
        );
        assert_eq!(ResolveError::NoCredentials.status(), None);
    }

    #[test]
    fn test_cache_status_serializes_tagged() {
        let status = CacheStatus::Hit {
            age: Duration::from_secs(5),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["source"], "hit");
        assert!(status.is_hit());
        assert!(!CacheStatus::Miss.is_hit());
    }
}
