//! Two-tier cache of opaque payloads: a bounded in-process LRU tier in front
//! of payload files on disk, with a separate metadata table.
//!
//! Every public operation is infallible from the caller's point of view.
//! Storage and encoding failures are logged, counted as anomalies or write
//! failures, and otherwise behave exactly like a miss.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gitview_core::{Clock, ResourceKey, TtlClass, resolve_policy};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bounded::BoundedLru;
use crate::error::Result;
use crate::metadata::{CacheEntry, EntryMetadata, MetadataTable};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::table::{FileTableStore, TableStore, load_json, save_json, write_atomic};

/// Table holding the persistent tier's metadata.
pub const METADATA_TABLE: &str = "cache-metadata";

const PAYLOAD_DIR: &str = "payloads";
const TABLE_DIR: &str = "tables";
const PAYLOAD_EXTENSION: &str = "bin";

/// Sizing of both tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct ByteCacheOptions {
    /// Root directory; payloads go to `<root>/payloads`, tables to
    /// `<root>/tables`.
    pub root: PathBuf,
    /// Maximum number of in-process entries.
    pub memory_max_entries: usize,
    /// Maximum summed payload bytes held in process.
    pub memory_max_bytes: usize,
    /// Cap on persisted payload bytes.
    pub disk_max_bytes: u64,
    /// Fraction of the cap that size eviction reduces usage to.
    pub low_water: f64,
}

impl ByteCacheOptions {
    /// Default sizing rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            memory_max_entries: 100,
            memory_max_bytes: 50 * 1024 * 1024,
            disk_max_bytes: 100 * 1024 * 1024,
            low_water: 0.5,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn low_water_bytes(&self) -> u64 {
        (self.disk_max_bytes as f64 * self.low_water.clamp(0.0, 1.0)) as u64
    }
}

/// Outcome of a maintenance pass over the persistent tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Entries removed because their TTL elapsed.
    pub expired: usize,
    /// Entries removed to bring usage under the low-water mark.
    pub evicted: usize,
    /// Payload files without metadata that were deleted.
    pub orphans: usize,
    /// Persisted payload bytes after the pass.
    pub bytes_after: u64,
}

struct CacheState {
    memory: BoundedLru<CacheEntry>,
    metadata: MetadataTable,
}

/// Two-tier byte cache keyed by [`ResourceKey`].
pub struct ByteCache {
    payload_dir: PathBuf,
    tables: Arc<dyn TableStore>,
    clock: Arc<dyn Clock>,
    disk_max_bytes: u64,
    low_water_bytes: u64,
    state: Mutex<CacheState>,
    stats: CacheStats,
}

impl ByteCache {
    /// Open the cache under `options.root`, storing metadata in
    /// `<root>/tables`, and run maintenance once.
    ///
    /// # Errors
    /// Returns an error when the payload directory cannot be created.
    pub async fn open(options: ByteCacheOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        let tables: Arc<dyn TableStore> =
            Arc::new(FileTableStore::new(options.root.join(TABLE_DIR)));
        Self::open_with_tables(options, tables, clock).await
    }

    /// Open the cache with an explicit metadata table store.
    ///
    /// Corrupted metadata is discarded (and reported) rather than failing.
    ///
    /// # Errors
    /// Returns an error when the payload directory cannot be created.
    pub async fn open_with_tables(
        options: ByteCacheOptions,
        tables: Arc<dyn TableStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let payload_dir = options.root.join(PAYLOAD_DIR);
        tokio::fs::create_dir_all(&payload_dir).await?;

        let stats = CacheStats::default();
        let metadata = match load_json::<MetadataTable>(tables.as_ref(), METADATA_TABLE).await {
            Ok(table) => table.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "Discarding unreadable cache metadata");
                stats.record_anomaly();
                MetadataTable::default()
            }
        };

        let cache = Self {
            payload_dir,
            tables,
            clock,
            disk_max_bytes: options.disk_max_bytes,
            low_water_bytes: options.low_water_bytes(),
            state: Mutex::new(CacheState {
                memory: BoundedLru::new(options.memory_max_entries, options.memory_max_bytes),
                metadata,
            }),
            stats,
        };
        cache.maintain().await;
        Ok(cache)
    }

    /// Directory holding payload files.
    #[must_use]
    pub fn payload_dir(&self) -> &Path {
        &self.payload_dir
    }

    /// Store `payload` under `key` in both tiers.
    ///
    /// Never fails: persistence errors are logged and counted.
    pub async fn put(&self, key: &ResourceKey, payload: Vec<u8>, policy: TtlClass) {
        let now = self.clock.now();
        let file = payload_file_name(key);
        let size = payload.len() as u64;
        let mut state = self.state.lock().await;

        match write_atomic(&self.payload_dir.join(&file), &payload).await {
            Ok(()) => {
                state.metadata.insert(
                    key.as_str().to_owned(),
                    EntryMetadata {
                        created_at: now,
                        policy,
                        size,
                        file,
                    },
                );
                let evicted = self.enforce_disk_cap(&mut state).await;
                if evicted > 0 {
                    debug!(evicted, "Evicted persisted entries over the size cap");
                }
            }
            Err(err) => {
                warn!(%key, error = %err, "Failed to persist cache payload");
                self.stats.record_write_failure();
                if let Some(stale) = state.metadata.remove(key.as_str()) {
                    self.remove_payload_file(&stale.file).await;
                }
            }
        }
        self.persist_metadata(&state.metadata).await;

        let evicted = state.memory.insert(
            key.as_str().to_owned(),
            CacheEntry {
                payload,
                created_at: now,
                policy,
            },
        );
        self.stats.record_evictions(evicted);
    }

    /// Fetch the payload for `key` if an unexpired copy exists in either tier.
    ///
    /// A persisted hit is promoted into the in-process tier.
    pub async fn get(&self, key: &ResourceKey) -> Option<Vec<u8>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(entry) = state.memory.get(key.as_str()) {
            if !entry.is_expired(now) {
                self.stats.record_memory_hit();
                return Some(entry.payload.clone());
            }
            state.memory.remove(key.as_str());
        }

        let Some(metadata) = state.metadata.get(key.as_str()).cloned() else {
            self.stats.record_miss();
            return None;
        };

        if metadata.is_expired(now) {
            debug!(%key, policy = %metadata.policy, "Evicting expired cache entry");
            self.stats.record_expiration();
            self.stats.record_miss();
            self.forget(&mut state, key.as_str(), &metadata.file).await;
            return None;
        }

        match tokio::fs::read(self.payload_dir.join(&metadata.file)).await {
            Ok(payload) => {
                self.stats.record_disk_hit();
                let evicted = state.memory.insert(
                    key.as_str().to_owned(),
                    CacheEntry {
                        payload: payload.clone(),
                        created_at: metadata.created_at,
                        policy: metadata.policy,
                    },
                );
                self.stats.record_evictions(evicted);
                Some(payload)
            }
            Err(err) => {
                warn!(%key, error = %err, "Cache metadata points at an unreadable payload");
                self.stats.record_anomaly();
                self.stats.record_miss();
                self.forget(&mut state, key.as_str(), &metadata.file).await;
                None
            }
        }
    }

    /// Whether an unexpired entry exists for `key`, judged from the
    /// in-process tier and the metadata table without reading payloads.
    pub async fn contains(&self, key: &ResourceKey) -> bool {
        let now = self.clock.now();
        let state = self.state.lock().await;
        state
            .memory
            .peek(key.as_str())
            .is_some_and(|entry| !entry.is_expired(now))
            || state
                .metadata
                .get(key.as_str())
                .is_some_and(|meta| !meta.is_expired(now))
    }

    /// Drop both tiers and the metadata table. Best-effort.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.memory.clear();
        state.metadata.clear();

        match tokio::fs::remove_dir_all(&self.payload_dir).await {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                warn!(error = %err, "Failed to remove cached payloads");
            }
            _ => {}
        }
        if let Err(err) = tokio::fs::create_dir_all(&self.payload_dir).await {
            warn!(error = %err, "Failed to recreate payload directory");
        }
        if let Err(err) = self.tables.remove(METADATA_TABLE).await {
            warn!(error = %err, "Failed to remove cache metadata");
        }
        drop(state);
        info!("Cache cleared");
    }

    /// Sum of persisted payload file sizes. Best-effort.
    pub async fn size_on_disk(&self) -> u64 {
        let mut total = 0;
        let mut entries = match tokio::fs::read_dir(&self.payload_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "Failed to list cached payloads");
                return 0;
            }
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if let Ok(meta) = entry.metadata().await
                        && meta.is_file()
                    {
                        total += meta.len();
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Stopped summing cached payloads early");
                    break;
                }
            }
        }
        total
    }

    /// Remove expired entries, evict oldest entries while over the cap and
    /// delete payload files no metadata refers to.
    pub async fn maintain(&self) -> MaintenanceReport {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut report = MaintenanceReport::default();

        for key in state.metadata.expired_keys(now) {
            if let Some(meta) = state.metadata.remove(&key) {
                self.remove_payload_file(&meta.file).await;
                state.memory.remove(&key);
                report.expired += 1;
            }
        }
        report.evicted = self.enforce_disk_cap(&mut state).await;
        report.orphans = self.remove_orphans(&state.metadata).await;
        report.bytes_after = state.metadata.total_size();

        self.persist_metadata(&state.metadata).await;
        drop(state);

        for _ in 0..report.expired {
            self.stats.record_expiration();
        }
        info!(
            expired = report.expired,
            evicted = report.evicted,
            orphans = report.orphans,
            bytes_after = report.bytes_after,
            "Cache maintenance finished"
        );
        report
    }

    /// Encode `value` as JSON and store it under `key`.
    ///
    /// `policy` defaults to a one-hour custom class.
    pub async fn cache_data<T>(&self, key: &ResourceKey, value: &T, policy: Option<TtlClass>)
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.put(key, bytes, policy.unwrap_or_else(TtlClass::default_data))
                    .await;
            }
            Err(err) => {
                warn!(%key, error = %err, "Failed to encode cached value");
                self.stats.record_anomaly();
            }
        }
    }

    /// Decode a JSON value stored with [`cache_data`](Self::cache_data).
    pub async fn get_cached_data<T>(&self, key: &ResourceKey) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%key, error = %err, "Failed to decode cached value");
                self.stats.record_anomaly();
                None
            }
        }
    }

    /// Cache page text for `url` with the policy resolved from the URL.
    pub async fn cache_html(&self, url: &str, html: &str) {
        let key = ResourceKey::new(url);
        self.put(&key, html.as_bytes().to_vec(), resolve_policy(url))
            .await;
    }

    /// Cached page text for `url`.
    pub async fn get_cached_html(&self, url: &str) -> Option<String> {
        let key = ResourceKey::new(url);
        let bytes = self.get(&key).await?;
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(%key, error = %err, "Cached page is not valid UTF-8");
                self.stats.record_anomaly();
                None
            }
        }
    }

    /// Counters describing cache behaviour so far.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    async fn enforce_disk_cap(&self, state: &mut CacheState) -> usize {
        if state.metadata.total_size() <= self.disk_max_bytes {
            return 0;
        }

        let mut evicted = 0;
        for key in state.metadata.keys_oldest_first() {
            if state.metadata.total_size() <= self.low_water_bytes {
                break;
            }
            if let Some(meta) = state.metadata.remove(&key) {
                self.remove_payload_file(&meta.file).await;
                evicted += 1;
            }
        }
        self.stats.record_evictions(evicted);
        evicted
    }

    async fn forget(&self, state: &mut CacheState, key: &str, file: &str) {
        state.memory.remove(key);
        state.metadata.remove(key);
        self.remove_payload_file(file).await;
        self.persist_metadata(&state.metadata).await;
    }

    async fn remove_payload_file(&self, file: &str) {
        match tokio::fs::remove_file(self.payload_dir.join(file)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                warn!(file, error = %err, "Failed to remove cached payload");
            }
            _ => {}
        }
    }

    async fn remove_orphans(&self, metadata: &MetadataTable) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(&self.payload_dir).await else {
            return 0;
        };
        let mut orphans = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !metadata.references_file(&name) {
                orphans.push(name);
            }
        }
        for name in &orphans {
            self.remove_payload_file(name).await;
        }
        orphans.len()
    }

    async fn persist_metadata(&self, metadata: &MetadataTable) {
        if let Err(err) = save_json(self.tables.as_ref(), METADATA_TABLE, metadata).await {
            warn!(error = %err, "Failed to persist cache metadata");
            self.stats.record_write_failure();
        }
    }
}

/// File name of the payload stored for `key`: hex SHA-256 of the key.
#[must_use]
pub fn payload_file_name(key: &ResourceKey) -> String {
    let digest = Sha256::digest(key.as_str().as_bytes());
    format!("{}.{PAYLOAD_EXTENSION}", hex::encode(digest))
}
