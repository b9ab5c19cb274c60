//! Composition root wiring every cache component from one configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use gitview_core::Clock;
use gitview_store::{ByteCache, TableStore};
use tracing::info;

use crate::access_log::AccessLog;
use crate::config::CacheConfig;
use crate::directory_cache::DirectoryCache;
use crate::prefetch::PrefetchScheduler;
use crate::request::RequestCoordinator;
use crate::snapshot::SnapshotStore;
use crate::transport::{DirectoryFetcher, Transport};

/// Every cache service of one application instance.
pub struct CacheServices {
    /// Two-tier byte cache.
    pub cache: Arc<ByteCache>,
    /// Deduplicating fetch front door.
    pub requests: Arc<RequestCoordinator>,
    /// Directory listing cache.
    pub directories: DirectoryCache,
    /// Access-driven prefetching.
    pub prefetch: PrefetchScheduler,
    /// Repository-list snapshot.
    pub snapshots: SnapshotStore,
}

impl CacheServices {
    /// Open the persistent state under `config.cache_dir` and wire the
    /// services. The prefetch sweep is not started.
    ///
    /// # Errors
    /// Returns an error when the cache directory cannot be prepared.
    pub async fn open(
        config: &CacheConfig,
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn DirectoryFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let tables: Arc<dyn TableStore> = Arc::new(config.table_store());
        let cache = ByteCache::open_with_tables(
            config.byte_cache_options(),
            Arc::clone(&tables),
            Arc::clone(&clock),
        )
        .await
        .with_context(|| format!("failed to open cache at {}", config.cache_dir.display()))?;
        let cache = Arc::new(cache);

        let requests = Arc::new(RequestCoordinator::new(transport, Arc::clone(&cache)));
        let directories = DirectoryCache::new(
            Arc::clone(&cache),
            Arc::clone(&clock),
            config.directory_options(),
        );
        let access = AccessLog::load(
            Arc::clone(&tables),
            Arc::clone(&clock),
            config.prefetch.flush_every,
            config.access_retention(),
        )
        .await;
        let prefetch = PrefetchScheduler::new(
            directories.clone(),
            fetcher,
            access,
            Arc::clone(&clock),
            config.prefetch_settings(),
        );
        let snapshots = SnapshotStore::new(tables, clock);

        info!(cache_dir = %config.cache_dir.display(), "Cache services ready");
        Ok(Self {
            cache,
            requests,
            directories,
            prefetch,
            snapshots,
        })
    }

    /// Cancel outstanding fetches, stop prefetching and flush the access
    /// log.
    pub async fn shutdown(&self) {
        self.requests.cancel_all();
        self.prefetch.shutdown().await;
    }
}
