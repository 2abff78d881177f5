//! CLI entry point for the teradl tool.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use teradl_core::{
    Config, DownloadOptions, Downloader, RequestOrchestrator, ResolvedFile, StrategyKind,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, CacheAction, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("building configuration")?,
    };
    debug!(?args, "CLI arguments parsed");

    let orchestrator = RequestOrchestrator::new(config).context("initializing orchestrator")?;

    match args.command {
        Command::Resolve {
            urls,
            force_refresh,
            strategy,
        } => run_resolve(&orchestrator, &urls, force_refresh, strategy).await,
        Command::Download {
            url,
            output,
            force_refresh,
        } => run_download(&orchestrator, &url, &output, force_refresh).await,
        Command::Cache { action } => run_cache(&orchestrator, &action),
        Command::Keys => run_keys(&orchestrator),
    }
}

async fn run_resolve(
    orchestrator: &RequestOrchestrator,
    urls: &[String],
    force_refresh: bool,
    strategy: Option<cli::StrategyArg>,
) -> Result<()> {
    if let Some(strategy) = strategy {
        let kind = StrategyKind::from(strategy);
        for url in urls {
            let manifest = orchestrator.resolve_with_strategy(url, kind).await?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        return Ok(());
    }

    let mut failures = 0usize;
    let results = if urls.len() == 1 {
        vec![orchestrator.resolve_with_cache(&urls[0], force_refresh).await]
    } else {
        orchestrator.resolve_all(urls).await
    };

    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(resolved) => {
                print_resolved(&resolved)?;
            }
            Err(error) => {
                failures += 1;
                warn!(url = %url, error = %error, "resolve failed");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} URL(s) failed to resolve", urls.len());
    }
    Ok(())
}

fn print_resolved(resolved: &ResolvedFile) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(resolved)?);
    Ok(())
}

async fn run_download(
    orchestrator: &RequestOrchestrator,
    url: &str,
    output: &std::path::Path,
    force_refresh: bool,
) -> Result<()> {
    let resolved = orchestrator.resolve_with_cache(url, force_refresh).await?;
    let candidate = resolved.payload.candidates();
    info!(file = %resolved.payload.file_name, mirrors = candidate.urls.len(), "starting download");

    let bar = ProgressBar::new(resolved.payload.sizebytes);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )?
        .progress_chars("#>-"),
    );
    let bar_for_progress = bar.clone();

    let downloader = Downloader::new().context("building download client")?;
    let options = DownloadOptions {
        progress: Some(Box::new(move |progress| {
            if let Some(total) = progress.total_bytes {
                bar_for_progress.set_length(total);
            }
            bar_for_progress.set_position(progress.bytes_downloaded);
        })),
        cancel: tokio_util::sync::CancellationToken::new(),
    };

    let downloaded = downloader
        .download(&candidate, output, &resolved.payload.file_name, &options)
        .await?;
    bar.finish();

    info!(
        path = %downloaded.path.display(),
        bytes = downloaded.bytes_downloaded,
        "download finished"
    );
    println!("{}", downloaded.path.display());
    Ok(())
}

fn run_cache(orchestrator: &RequestOrchestrator, action: &CacheAction) -> Result<()> {
    let cache = orchestrator.cache();
    match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheAction::Cleanup => {
            let removed = cache.cleanup()?;
            println!("removed {removed} expired entr{}", plural_y(removed));
        }
        CacheAction::Clear { key } => {
            let removed = cache.clear(key.as_deref())?;
            println!("removed {removed} entr{}", plural_y(removed));
        }
    }
    Ok(())
}

fn run_keys(orchestrator: &RequestOrchestrator) -> Result<()> {
    let stats = orchestrator.pool().stats();
    let snapshots = orchestrator.pool().snapshots();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "pool": stats,
            "credentials": snapshots,
        }))?
    );
    Ok(())
}

fn plural_y(count: usize) -> &'static str {
    if count == 1 { "y" } else { "ies" }
}
