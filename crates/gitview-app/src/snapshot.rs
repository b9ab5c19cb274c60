//! Write-whole snapshot of the repository list.

use std::sync::Arc;

use gitview_core::Clock;
use gitview_store::{TableStore, load_json, save_json};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

/// Table holding the repository-list snapshot.
pub const REPOSITORY_LIST_TABLE: &str = "repository-list";

/// A persisted repository list and when it was saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryListSnapshot<T> {
    #[serde(with = "time::serde::rfc3339")]
    /// Save time.
    pub saved_at: OffsetDateTime,
    /// The caller's repository list, opaque to this crate.
    pub repositories: T,
}

/// Stores the last known repository list so it can be shown before the
/// first fetch completes.
pub struct SnapshotStore {
    tables: Arc<dyn TableStore>,
    clock: Arc<dyn Clock>,
}

impl SnapshotStore {
    /// Create a store writing through `tables`.
    pub fn new(tables: Arc<dyn TableStore>, clock: Arc<dyn Clock>) -> Self {
        Self { tables, clock }
    }

    /// Replace the stored repository list. Failures are logged.
    pub async fn save_repository_list<T>(&self, repositories: &T)
    where
        T: Serialize + Sync,
    {
        let snapshot = RepositoryListSnapshot {
            saved_at: self.clock.now(),
            repositories,
        };
        if let Err(err) = save_json(self.tables.as_ref(), REPOSITORY_LIST_TABLE, &snapshot).await {
            warn!(error = %err, "Failed to save repository list");
        }
    }

    /// The stored repository list, if one exists and decodes as `T`.
    pub async fn load_repository_list<T>(&self) -> Option<RepositoryListSnapshot<T>>
    where
        T: DeserializeOwned,
    {
        match load_json(self.tables.as_ref(), REPOSITORY_LIST_TABLE).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Ignoring unreadable repository list");
                None
            }
        }
    }

    /// Forget the stored repository list.
    pub async fn clear(&self) {
        if let Err(err) = self.tables.remove(REPOSITORY_LIST_TABLE).await {
            warn!(error = %err, "Failed to remove repository list");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use gitview_core::ManualClock;
    use gitview_store::MemoryTableStore;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Repo {
        name: String,
        description: String,
    }

    #[tokio::test]
    async fn round_trips_and_clears() {
        let store = SnapshotStore::new(
            Arc::new(MemoryTableStore::new()),
            Arc::new(ManualClock::default()),
        );
        assert!(store.load_repository_list::<Vec<Repo>>().await.is_none());

        let repos = vec![Repo {
            name: "cgit".into(),
            description: "web frontend".into(),
        }];
        store.save_repository_list(&repos).await;

        let loaded = store.load_repository_list::<Vec<Repo>>().await.unwrap();
        assert_eq!(loaded.repositories, repos);
        assert_eq!(loaded.saved_at, OffsetDateTime::UNIX_EPOCH);

        store.clear().await;
        assert!(store.load_repository_list::<Vec<Repo>>().await.is_none());
    }

    #[tokio::test]
    async fn mismatched_shape_is_ignored() {
        let tables = Arc::new(MemoryTableStore::new());
        let store = SnapshotStore::new(tables.clone(), Arc::new(ManualClock::default()));
        store.save_repository_list(&vec!["a", "b"]).await;

        assert!(store.load_repository_list::<Vec<Repo>>().await.is_none());
        assert_eq!(tables.len(), 1);
    }
}
