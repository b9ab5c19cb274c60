use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use gitview_app::{AccessLog, CacheConfig};
use gitview_core::{AccessPattern, Clock, ResourceKey, SystemClock, resolve_policy};
use gitview_store::{ByteCache, MaintenanceReport, payload_file_name};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::{CacheAction, Command};

pub async fn run(command: Command, config: &CacheConfig) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    match command {
        Command::Policy { identifier } => {
            print!("{}", render_policy(&identifier));
            Ok(())
        }
        Command::Cache { action } => {
            let cache = open_cache(config, clock).await?;
            match action {
                CacheAction::Size => {
                    println!("{}", format_bytes(cache.size_on_disk().await));
                }
                CacheAction::Clear => {
                    cache.clear().await;
                    println!("Cleared cache at {}", config.cache_dir.display());
                }
                CacheAction::Maintain => {
                    let report = cache.maintain().await;
                    print!("{}", render_report(&report));
                }
            }
            Ok(())
        }
        Command::Patterns { limit } => {
            let tables = Arc::new(config.table_store());
            let now = clock.now();
            let log = AccessLog::load(
                tables,
                clock,
                config.prefetch.flush_every,
                config.access_retention(),
            )
            .await;
            let ranked = log.ranked(now, limit).await;
            if ranked.is_empty() {
                println!("No access patterns recorded.");
            } else {
                print!("{}", render_patterns(&ranked, now)?);
            }
            Ok(())
        }
    }
}

async fn open_cache(config: &CacheConfig, clock: Arc<dyn Clock>) -> Result<ByteCache> {
    ByteCache::open(config.byte_cache_options(), clock)
        .await
        .with_context(|| format!("failed to open cache at {}", config.cache_dir.display()))
}

fn render_policy(identifier: &str) -> String {
    let key = ResourceKey::new(identifier);
    let policy = resolve_policy(identifier);
    let mut out = String::new();
    let _ = writeln!(out, "policy: {policy}");
    let _ = writeln!(out, "ttl:    {}", format_ttl(policy.ttl().as_secs()));
    let _ = writeln!(out, "key:    {key}");
    let _ = writeln!(out, "file:   {}", payload_file_name(&key));
    out
}

fn render_report(report: &MaintenanceReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "expired removed: {}", report.expired);
    let _ = writeln!(out, "evicted for size: {}", report.evicted);
    let _ = writeln!(out, "orphans removed: {}", report.orphans);
    let _ = writeln!(out, "bytes on disk: {}", format_bytes(report.bytes_after));
    out
}

fn render_patterns(patterns: &[AccessPattern], now: OffsetDateTime) -> Result<String> {
    let mut out = String::new();
    for pattern in patterns {
        let last = pattern
            .last_accessed_at
            .format(&Rfc3339)
            .context("failed to format access time")?;
        let _ = writeln!(
            out,
            "{:.3}  {:>5}  {last}  {}:{}",
            pattern.score(now),
            pattern.access_count,
            pattern.repository,
            pattern.path
        );
    }
    Ok(out)
}

fn format_ttl(seconds: u64) -> String {
    const HOUR: u64 = 3600;
    const DAY: u64 = 24 * HOUR;
    match seconds {
        s if s >= DAY && s % DAY == 0 => format!("{}d", s / DAY),
        s if s >= HOUR && s % HOUR == 0 => format!("{}h", s / HOUR),
        s => format!("{s}s"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
