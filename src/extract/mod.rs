//! Extraction strategies: three alternative ways to resolve a share link.
//!
//! All strategies implement the same [`Extractor`] contract and normalize
//! their wire responses into one [`ShareManifest`] schema, so callers never
//! branch on response shape. Conceptually each resolve walks the same state
//! machine (resolve short code, fetch manifest, expand subdirectories) and
//! aborts on the first failing step; partial results are never returned.
//!
//! - [`DynamicTokenExtractor`] scrapes the share page live for its token.
//! - [`StaticSessionExtractor`] runs the same pipeline with a pre-configured
//!   session context.
//! - [`ExternalRelayExtractor`] skips the token entirely and obtains signing
//!   material from a third-party relay.

mod dynamic;
mod error;
mod pipeline;
mod relay;
mod static_session;

pub use dynamic::DynamicTokenExtractor;
pub use error::ExtractError;
pub use pipeline::Endpoints;
pub use relay::ExternalRelayExtractor;
pub use static_session::StaticSessionExtractor;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::manifest::{DownloadCandidate, FileRecord, ShareManifest};
use crate::net::{RetryExecutor, RetryPolicy, build_http_client};
use crate::parser::ShareLink;
use crate::user_agent::UserAgentPool;

/// Which extraction strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    DynamicToken,
    StaticSession,
    ExternalRelay,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::DynamicToken => "dynamic-token",
            Self::StaticSession => "static-session",
            Self::ExternalRelay => "external-relay",
        })
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "dynamic-token" | "dynamic" => Ok(Self::DynamicToken),
            "static-session" | "static" => Ok(Self::StaticSession),
            "external-relay" | "relay" => Ok(Self::ExternalRelay),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// Contract every extraction strategy implements.
///
/// Uses `async_trait` for `Box<dyn Extractor>` dispatch; Rust 2024 native
/// async traits are not object-safe.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Strategy name for logging and observability.
    fn name(&self) -> &'static str;

    /// Resolves a normalized share link into a complete manifest.
    async fn resolve(&self, link: &ShareLink) -> Result<ShareManifest, ExtractError>;

    /// Produces the ordered mirror URLs for one file of a resolved manifest.
    async fn download_candidates(
        &self,
        file: &FileRecord,
        manifest: &ShareManifest,
    ) -> Result<DownloadCandidate, ExtractError>;
}

/// Builds the extractor for `kind` from configuration.
///
/// # Errors
///
/// Returns [`ExtractError::ExternalService`] when the HTTP client cannot be
/// constructed.
pub fn build_extractor(
    kind: StrategyKind,
    config: &Config,
    cancel: CancellationToken,
) -> Result<Box<dyn Extractor>, ExtractError> {
    let endpoints = Endpoints::default();
    Ok(match kind {
        StrategyKind::DynamicToken => {
            Box::new(DynamicTokenExtractor::new(config, cancel, endpoints)?)
        }
        StrategyKind::StaticSession => {
            Box::new(StaticSessionExtractor::new(config, cancel, endpoints)?)
        }
        StrategyKind::ExternalRelay => {
            Box::new(ExternalRelayExtractor::new(config, cancel, endpoints)?)
        }
    })
}

/// Shared client construction for strategies.
fn strategy_client(
    config: &Config,
    agents: &UserAgentPool,
) -> Result<Client, ExtractError> {
    build_http_client(
        config.network.connect_timeout_secs,
        config.network.read_timeout_secs,
        agents.initial(),
        None,
    )
    .map_err(|error| {
        ExtractError::external(format!("HTTP client construction failed: {error}"), None)
    })
}

/// Shared retry-executor construction for strategies.
fn strategy_executor(
    config: &Config,
    agents: UserAgentPool,
    cancel: CancellationToken,
) -> RetryExecutor {
    RetryExecutor::new(
        RetryPolicy::new(config.network.max_retries, config.network.base_delay()),
        agents,
        cancel,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_round_trip() {
        for kind in [
            StrategyKind::DynamicToken,
            StrategyKind::StaticSession,
            StrategyKind::ExternalRelay,
        ] {
            let parsed: StrategyKind = kind.to_string().parse().expect("parses");
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_strategy_kind_aliases() {
        assert_eq!(
            "relay".parse::<StrategyKind>().expect("parses"),
            StrategyKind::ExternalRelay
        );
        assert!("browser".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_build_extractor_each_kind() {
        let config = Config::default();
        for kind in [
            StrategyKind::DynamicToken,
            StrategyKind::StaticSession,
            StrategyKind::ExternalRelay,
        ] {
            let extractor = build_extractor(kind, &config, CancellationToken::new());
            assert!(extractor.is_ok(), "building {kind} failed");
        }
    }
}
