//! Static-session strategy: the dynamic pipeline with a pre-configured
//! session context instead of a live scrape.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::manifest::{DownloadCandidate, FileRecord, SessionContext, ShareManifest};
use crate::parser::ShareLink;
use crate::user_agent::UserAgentPool;

use super::pipeline::{Endpoints, SharePipeline};
use super::{ExtractError, Extractor, strategy_client, strategy_executor};

/// Resolves shares with a session context supplied from configuration.
///
/// When no page token is configured the strategy degrades to the dynamic
/// behavior and scrapes one live.
#[derive(Debug, Clone)]
pub struct StaticSessionExtractor {
    pipeline: SharePipeline,
    cookie: Option<String>,
    js_token: Option<String>,
}

impl StaticSessionExtractor {
    /// Builds the strategy from configuration, capturing the configured
    /// session context.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ExternalService`] when the HTTP client cannot
    /// be constructed.
    pub fn new(
        config: &Config,
        cancel: CancellationToken,
        endpoints: Endpoints,
    ) -> Result<Self, ExtractError> {
        let agents = UserAgentPool::new(config.network.user_agents.clone());
        let client = strategy_client(config, &agents)?;
        let executor = strategy_executor(config, agents, cancel);
        Ok(Self {
            pipeline: SharePipeline::new(client, executor, endpoints),
            cookie: config.session.cookie.clone(),
            js_token: config.session.js_token.clone(),
        })
    }

    async fn session_for(
        &self,
        link: &ShareLink,
        code: &str,
    ) -> Result<SessionContext, ExtractError> {
        if let Some(js_token) = &self.js_token {
            return Ok(SessionContext {
                cookie: self.cookie.clone().unwrap_or_default(),
                js_token: js_token.clone(),
            });
        }
        debug!("no configured page token, scraping one live");
        self.pipeline.scrape_session(link, code).await
    }
}

#[async_trait]
impl Extractor for StaticSessionExtractor {
    fn name(&self) -> &'static str {
        "static-session"
    }

    #[instrument(skip(self, link), fields(short_code = %link.short_code))]
    async fn resolve(&self, link: &ShareLink) -> Result<ShareManifest, ExtractError> {
        let code = self.pipeline.discover_short_code(link).await?;
        let session = self.session_for(link, &code).await?;
        let manifest = self
            .pipeline
            .fetch_manifest(link, &code, Some(session))
            .await?;
        info!(
            share_id = %manifest.share_id,
            files = manifest.file_count(),
            "share resolved"
        );
        Ok(manifest)
    }

    async fn download_candidates(
        &self,
        file: &FileRecord,
        manifest: &ShareManifest,
    ) -> Result<DownloadCandidate, ExtractError> {
        self.pipeline.token_download_links(file, manifest).await
    }
}
