//! Dynamic-token strategy: scrape the share page live for its session.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::Config;
use crate::manifest::{DownloadCandidate, FileRecord, ShareManifest};
use crate::parser::ShareLink;
use crate::user_agent::UserAgentPool;

use super::pipeline::{Endpoints, SharePipeline};
use super::{ExtractError, Extractor, strategy_client, strategy_executor};

/// Resolves shares by following the redirect, mining the page token, and
/// expanding the file tree through the listing endpoint.
#[derive(Debug, Clone)]
pub struct DynamicTokenExtractor {
    pipeline: SharePipeline,
}

impl DynamicTokenExtractor {
    /// Builds the strategy from configuration.
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
        })
    }
}

#[async_trait]
impl Extractor for DynamicTokenExtractor {
    fn name(&self) -> &'static str {
        "dynamic-token"
    }

    #[instrument(skip(self, link), fields(short_code = %link.short_code))]
    async fn resolve(&self, link: &ShareLink) -> Result<ShareManifest, ExtractError> {
        let code = self.pipeline.discover_short_code(link).await?;
        let session = self.pipeline.scrape_session(link, &code).await?;
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
