//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use teradl_core::StrategyKind;

/// Resolve TeraBox share links into file metadata and direct download URLs.
#[derive(Parser, Debug)]
#[command(name = "teradl")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to a JSON configuration file
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Strategy names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Dynamic,
    Static,
    Relay,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Dynamic => Self::DynamicToken,
            StrategyArg::Static => Self::StaticSession,
            StrategyArg::Relay => Self::ExternalRelay,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve one or more share URLs to file metadata
    Resolve {
        /// Share URLs to resolve
        #[arg(required = true)]
        urls: Vec<String>,

        /// Bypass the response cache and force a fresh lookup
        #[arg(short, long)]
        force_refresh: bool,

        /// Use an extraction strategy instead of the commercial API
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Resolve a share URL and download its file
    Download {
        /// Share URL to download
        url: String,

        /// Output directory
        #[arg(short, long, default_value = "downloads")]
        output: PathBuf,

        /// Bypass the response cache and force a fresh lookup
        #[arg(short, long)]
        force_refresh: bool,
    },

    /// Inspect or maintain the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show credential pool health
    Keys,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry counts and sizes
    Stats,
    /// Remove expired entries
    Cleanup,
    /// Remove one entry by short code, or everything
    Clear {
        /// Short code to clear; clears all entries when omitted
        key: Option<String>,
    },
}
