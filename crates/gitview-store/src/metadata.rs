//! Cache entries and the persistent tier's metadata table.
//!
//! Metadata lives apart from payload files so expiry and size can be
//! inspected without touching payload bytes.

use std::collections::BTreeMap;

use gitview_core::TtlClass;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::bounded::Weighted;

/// Payload held by the in-process tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Write time.
    pub created_at: OffsetDateTime,
    /// TTL class the entry was written with.
    pub policy: TtlClass,
}

impl CacheEntry {
    /// Whether the entry is past its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.policy.is_expired(self.created_at, now)
    }
}

impl Weighted for CacheEntry {
    fn weight(&self) -> usize {
        self.payload.len()
    }
}

/// Authoritative metadata of one persisted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    #[serde(with = "time::serde::rfc3339")]
    /// Write time.
    pub created_at: OffsetDateTime,
    /// TTL class the entry was written with.
    pub policy: TtlClass,
    /// Payload size in bytes.
    pub size: u64,
    /// Payload file name inside the payload directory.
    pub file: String,
}

impl EntryMetadata {
    /// Whether the entry is past its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.policy.is_expired(self.created_at, now)
    }
}

/// Key → metadata map for the persistent tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataTable {
    entries: BTreeMap<String, EntryMetadata>,
}

impl MetadataTable {
    /// Metadata for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&EntryMetadata> {
        self.entries.get(key)
    }

    /// Record metadata, returning the previous record for the key.
    pub fn insert(&mut self, key: String, metadata: EntryMetadata) -> Option<EntryMetadata> {
        self.entries.insert(key, metadata)
    }

    /// Forget `key`.
    pub fn remove(&mut self, key: &str) -> Option<EntryMetadata> {
        self.entries.remove(key)
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of recorded payload sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|meta| meta.size).sum()
    }

    /// Keys whose entries are expired at `now`.
    #[must_use]
    pub fn expired_keys(&self, now: OffsetDateTime) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, meta)| meta.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys ordered oldest creation first; ties broken by key.
    #[must_use]
    pub fn keys_oldest_first(&self) -> Vec<String> {
        let mut keyed: Vec<(&OffsetDateTime, &String)> = self
            .entries
            .iter()
            .map(|(key, meta)| (&meta.created_at, key))
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, key)| key.clone()).collect()
    }

    /// Whether some record points at payload file `file`.
    #[must_use]
    pub fn references_file(&self, file: &str) -> bool {
        self.entries.values().any(|meta| meta.file == file)
    }
}
