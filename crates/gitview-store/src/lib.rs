//! Storage layer for gitview: the two-tier byte cache, durable JSON tables
//! and the bounded LRU tier shared with the directory cache.

/// Bounded in-process LRU tier.
pub mod bounded;
/// Two-tier byte cache.
pub mod byte_cache;
/// Storage errors.
pub mod error;
/// Cache entries and the persistent metadata table.
pub mod metadata;
/// Cache counters.
pub mod stats;
/// Durable key-value tables.
pub mod table;

pub use bounded::{BoundedLru, Weighted};
pub use byte_cache::{ByteCache, ByteCacheOptions, METADATA_TABLE, MaintenanceReport, payload_file_name};
pub use error::{Result, StoreError};
pub use metadata::{CacheEntry, EntryMetadata, MetadataTable};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use table::{FileTableStore, MemoryTableStore, TableStore, load_json, save_json};
