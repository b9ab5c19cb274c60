//! Durable key-value tables with read-whole / write-whole semantics.
//!
//! Used for the cache metadata table, the access-pattern table and the
//! repository-list snapshot. No partial updates are needed by any caller.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, StoreError};

/// Storage of named, opaque tables.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Read a whole table, returning `None` when it has never been written.
    async fn load(&self, table: &str) -> Result<Option<Vec<u8>>>;

    /// Replace a whole table.
    async fn save(&self, table: &str, contents: &[u8]) -> Result<()>;

    /// Delete a table. Removing a missing table is not an error.
    async fn remove(&self, table: &str) -> Result<()>;
}

/// Load and decode a JSON table.
///
/// # Errors
/// Propagates storage failures and JSON decoding errors.
pub async fn load_json<T>(store: &dyn TableStore, table: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    match store.load(table).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and save a JSON table.
///
/// # Errors
/// Propagates JSON encoding errors and storage failures.
pub async fn save_json<T>(store: &dyn TableStore, table: &str, value: &T) -> Result<()>
where
    T: Serialize + Sync + ?Sized,
{
    let bytes = serde_json::to_vec(value)?;
    store.save(table, &bytes).await
}

/// Tables stored as `<dir>/<table>.json` files.
#[derive(Debug, Clone)]
pub struct FileTableStore {
    dir: PathBuf,
}

impl FileTableStore {
    /// Store tables under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the table files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> Result<PathBuf> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidTable(table.to_owned()));
        }
        Ok(self.dir.join(format!("{table}.json")))
    }
}

#[async_trait]
impl TableStore for FileTableStore {
    async fn load(&self, table: &str) -> Result<Option<Vec<u8>>> {
        let path = self.table_path(table)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, table: &str, contents: &[u8]) -> Result<()> {
        let path = self.table_path(table)?;
        write_atomic(&path, contents).await
    }

    async fn remove(&self, table: &str) -> Result<()> {
        let path = self.table_path(table)?;
        match tokio::fs::remove_file(&path).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

/// Volatile tables, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryTableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no table has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn load(&self, table: &str) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(table).cloned())
    }

    async fn save(&self, table: &str, contents: &[u8]) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables.insert(table.to_owned(), contents.to_vec());
        Ok(())
    }

    async fn remove(&self, table: &str) -> Result<()> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(table);
        Ok(())
    }
}

/// Write `contents` to a temporary sibling of `path`, then rename it into
/// place so readers never observe a partial file.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, contents).await?;
    if let Err(err) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(err.into());
    }
    Ok(())
}
