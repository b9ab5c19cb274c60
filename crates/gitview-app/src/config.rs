use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use gitview_store::{ByteCacheOptions, FileTableStore};
use serde::Deserialize;

use crate::directory_cache::DirectoryCacheOptions;
use crate::prefetch::PrefetchSettings;

const APP_DIR: &str = "gitview";
const CONFIG_FILE: &str = "config.toml";
const TABLE_DIR: &str = "tables";
const MIN_RETENTION_DAYS: u64 = 30;

/// Cache configuration loaded from `<cache dir>/config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Root of every persisted cache file.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// In-process tier of the byte cache.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Persistent tier of the byte cache.
    #[serde(default)]
    pub disk: DiskConfig,
    /// In-process tier of the directory cache.
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Prefetch scheduling.
    #[serde(default)]
    pub prefetch: PrefetchConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
            directory: DirectoryConfig::default(),
            prefetch: PrefetchConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load configuration for the cache rooted at `cache_dir` (or the
    /// platform default), reading `config.toml` inside it when present.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read, parsed or
    /// validated.
    pub fn discover(cache_dir: Option<&Path>) -> Result<Self> {
        let root = cache_dir.map_or_else(default_cache_dir, Path::to_path_buf);
        let mut config = Self::from_file(root.join(CONFIG_FILE))?;
        if cache_dir.is_some() {
            config.cache_dir = root;
        }
        Ok(config)
    }

    /// Load configuration from an explicit file. A missing file yields the
    /// defaults.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read, parsed or
    /// validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every limit.
    ///
    /// # Errors
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        ensure_positive("memory.max_entries", self.memory.max_entries)?;
        ensure_positive("memory.max_bytes", self.memory.max_bytes)?;
        ensure_positive("disk.max_bytes", self.disk.max_bytes)?;
        if !(self.disk.low_water > 0.0 && self.disk.low_water < 1.0) {
            bail!(
                "disk.low_water must be between 0 and 1 (exclusive), got {}",
                self.disk.low_water
            );
        }
        ensure_positive("directory.max_entries", self.directory.max_entries)?;
        ensure_positive("directory.max_cost", self.directory.max_cost)?;
        ensure_positive("prefetch.interval_secs", self.prefetch.interval_secs)?;
        ensure_positive("prefetch.sweep_limit", self.prefetch.sweep_limit)?;
        ensure_positive("prefetch.reactive_limit", self.prefetch.reactive_limit)?;
        ensure_positive("prefetch.child_limit", self.prefetch.child_limit)?;
        ensure_positive("prefetch.concurrency", self.prefetch.concurrency)?;
        ensure_positive("prefetch.flush_every", self.prefetch.flush_every)?;
        if self.prefetch.retention_days < MIN_RETENTION_DAYS {
            bail!(
                "prefetch.retention_days must be at least {MIN_RETENTION_DAYS}, got {}",
                self.prefetch.retention_days
            );
        }
        Ok(())
    }

    /// Byte cache sizing rooted at the cache directory.
    #[must_use]
    pub fn byte_cache_options(&self) -> ByteCacheOptions {
        ByteCacheOptions {
            root: self.cache_dir.clone(),
            memory_max_entries: self.memory.max_entries,
            memory_max_bytes: self.memory.max_bytes,
            disk_max_bytes: self.disk.max_bytes,
            low_water: self.disk.low_water,
        }
    }

    /// Directory cache sizing.
    #[must_use]
    pub const fn directory_options(&self) -> DirectoryCacheOptions {
        DirectoryCacheOptions {
            max_entries: self.directory.max_entries,
            max_cost: self.directory.max_cost,
            child_limit: self.prefetch.child_limit,
            concurrency: self.prefetch.concurrency,
        }
    }

    /// Prefetch scheduler tunables.
    #[must_use]
    pub const fn prefetch_settings(&self) -> PrefetchSettings {
        PrefetchSettings {
            interval: Duration::from_secs(self.prefetch.interval_secs),
            sweep_limit: self.prefetch.sweep_limit,
            reactive_limit: self.prefetch.reactive_limit,
        }
    }

    /// Retention of access patterns.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn access_retention(&self) -> time::Duration {
        time::Duration::days(self.prefetch.retention_days as i64)
    }

    /// Durable tables shared by the cache metadata, access log and
    /// snapshots.
    #[must_use]
    pub fn table_store(&self) -> FileTableStore {
        FileTableStore::new(self.cache_dir.join(TABLE_DIR))
    }
}

/// `[memory]` section.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum in-process entries.
    pub max_entries: usize,
    /// Maximum in-process payload bytes.
    pub max_bytes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

/// `[disk]` section.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiskConfig {
    /// Cap on persisted payload bytes.
    pub max_bytes: u64,
    /// Fraction of the cap eviction reduces usage to.
    pub low_water: f64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
            low_water: 0.5,
        }
    }
}

/// `[directory]` section.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Maximum in-process listings.
    pub max_entries: usize,
    /// Ceiling on the estimated cost of in-process listings.
    pub max_cost: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            max_cost: 20 * 1024 * 1024,
        }
    }
}

/// `[prefetch]` section.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Seconds between background sweeps.
    pub interval_secs: u64,
    /// Patterns visited per sweep.
    pub sweep_limit: usize,
    /// Siblings and children fetched per tracked access.
    pub reactive_limit: usize,
    /// Children fetched per explicit child prefetch.
    pub child_limit: usize,
    /// Parallelism of child fetches.
    pub concurrency: usize,
    /// Access-log updates between flushes.
    pub flush_every: usize,
    /// Days an access pattern is kept without a new access.
    pub retention_days: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            sweep_limit: 10,
            reactive_limit: 3,
            child_limit: 5,
            concurrency: 5,
            flush_every: 10,
            retention_days: 60,
        }
    }
}

/// Platform cache directory for gitview, falling back to the temp dir.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

fn ensure_positive<T>(name: &str, value: T) -> Result<()>
where
    T: Default + PartialEq,
{
    if value == T::default() {
        bail!("{name} must be greater than zero");
    }
    Ok(())
}
