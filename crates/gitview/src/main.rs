//! CLI entry point for gitview.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gitview_app::CacheConfig;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;

/// Inspect and maintain the gitview cache.
#[derive(Parser, Debug)]
#[command(
    name = "gitview",
    version,
    about = "gitview: inspect and maintain the on-disk browsing cache"
)]
struct Cli {
    /// Cache directory (defaults to the platform cache dir).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Configuration file (defaults to <cache dir>/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the TTL class an identifier resolves to.
    Policy {
        /// URL or path of the resource.
        identifier: String,
    },

    /// Persistent cache operations.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List access patterns, most desirable first.
    Patterns {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum CacheAction {
    /// Print persisted payload bytes.
    Size,
    /// Drop every cached entry.
    Clear,
    /// Remove expired, oversized and orphaned entries.
    Maintain,
}

fn main() -> Result<()> {
    let Cli {
        cache_dir,
        config,
        cmd,
    } = Cli::parse();

    install_tracing();

    let config = load_config(cache_dir, config)?;
    tokio::runtime::Runtime::new()?.block_on(commands::run(cmd, &config))
}

fn load_config(cache_dir: Option<PathBuf>, config: Option<PathBuf>) -> Result<CacheConfig> {
    match config {
        Some(path) => {
            let mut loaded = CacheConfig::from_file(path)?;
            if let Some(dir) = cache_dir {
                loaded.cache_dir = dir;
            }
            Ok(loaded)
        }
        None => CacheConfig::discover(cache_dir.as_deref()),
    }
}

fn install_tracing() {
    // RUST_LOG overrides the default INFO level.
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .try_init();
}
