//! Cache of directory listings keyed by `(repository, path)`.
//!
//! Listings live in a bounded in-process tier in front of the typed
//! [`ByteCache`] tier. Every stored listing is in canonical order
//! (directories first, then case-insensitive name). A per-repository tree
//! aggregate is kept in process only and can be rebuilt from the per-path
//! entries.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use futures::stream;
use gitview_core::{Clock, FileNode, ResourceKey, TtlClass, normalize_path, sort_listing};
use gitview_store::{BoundedLru, ByteCache, Weighted};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::in_flight::InFlightTable;
use crate::transport::DirectoryFetcher;

/// Sizing of the directory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryCacheOptions {
    /// Maximum number of listings held in process.
    pub max_entries: usize,
    /// Ceiling on the summed estimated cost of in-process listings.
    pub max_cost: usize,
    /// Children fetched per [`DirectoryCache::prefetch_children`] call.
    pub child_limit: usize,
    /// Parallelism of child fetches.
    pub concurrency: usize,
}

impl Default for DirectoryCacheOptions {
    fn default() -> Self {
        Self {
            max_entries: 200,
            max_cost: 20 * 1024 * 1024,
            child_limit: 5,
            concurrency: 5,
        }
    }
}

/// Snapshot of one directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    /// Repository the listing belongs to.
    pub repository: String,
    /// Normalized repository-relative path.
    pub path: String,
    /// Entries in canonical order.
    pub files: Vec<FileNode>,
    /// When the listing was stored.
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
}

impl Weighted for DirectoryListing {
    fn weight(&self) -> usize {
        self.files.iter().map(FileNode::estimated_bytes).sum::<usize>()
            + self.path.len()
            + self.repository.len()
    }
}

/// Every known directory of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTree {
    /// Repository name.
    pub repository: String,
    /// Normalized path to canonical listing.
    pub directories: BTreeMap<String, Vec<FileNode>>,
    /// When the aggregate was built or stored.
    pub cached_at: OffsetDateTime,
}

struct DirectoryState {
    listings: BoundedLru<DirectoryListing>,
    trees: HashMap<String, RepositoryTree>,
}

struct Inner {
    cache: Arc<ByteCache>,
    clock: Arc<dyn Clock>,
    options: DirectoryCacheOptions,
    state: Mutex<DirectoryState>,
    loads: InFlightTable<Vec<FileNode>>,
    loading: watch::Sender<BTreeSet<String>>,
}

/// Handle to the directory cache. Clones share state.
#[derive(Clone)]
pub struct DirectoryCache {
    inner: Arc<Inner>,
}

impl DirectoryCache {
    /// Create a directory cache backed by `cache`.
    pub fn new(cache: Arc<ByteCache>, clock: Arc<dyn Clock>, options: DirectoryCacheOptions) -> Self {
        let (loading, _) = watch::channel(BTreeSet::new());
        Self {
            inner: Arc::new(Inner {
                cache,
                clock,
                options,
                state: Mutex::new(DirectoryState {
                    listings: BoundedLru::new(options.max_entries, options.max_cost),
                    trees: HashMap::new(),
                }),
                loads: InFlightTable::new(),
                loading,
            }),
        }
    }

    /// Cached listing of `path` in `repository`.
    pub async fn get_directory(&self, repository: &str, path: &str) -> Option<Vec<FileNode>> {
        let path = normalize_path(path);
        let key = listing_key(repository, path);
        let now = self.inner.clock.now();

        {
            let mut state = self.lock_state();
            if let Some(listing) = state.listings.get(&key) {
                if !TtlClass::TreeStructure.is_expired(listing.cached_at, now) {
                    return Some(listing.files.clone());
                }
                debug!(%key, "Evicting expired listing");
                state.listings.remove(&key);
            }
        }

        let mut listing: DirectoryListing = self
            .inner
            .cache
            .get_cached_data(&typed_key(repository, path))
            .await?;
        sort_listing(&mut listing.files);
        let files = listing.files.clone();
        self.lock_state().listings.insert(key, listing);
        Some(files)
    }

    /// Store a listing of `path` in `repository`, canonicalizing its order.
    ///
    /// An existing tree aggregate for the repository is updated in place.
    pub async fn put_directory(&self, repository: &str, path: &str, mut files: Vec<FileNode>) {
        let path = normalize_path(path);
        sort_listing(&mut files);
        let listing = DirectoryListing {
            repository: repository.to_owned(),
            path: path.to_owned(),
            files,
            cached_at: self.inner.clock.now(),
        };

        {
            let mut state = self.lock_state();
            if let Some(tree) = state.trees.get_mut(repository) {
                tree.directories
                    .insert(path.to_owned(), listing.files.clone());
            }
            state
                .listings
                .insert(listing_key(repository, path), listing.clone());
        }

        self.inner
            .cache
            .cache_data(
                &typed_key(repository, path),
                &listing,
                Some(TtlClass::TreeStructure),
            )
            .await;
    }

    /// Fetch `path` through `fetcher`, store it and return it.
    ///
    /// Concurrent loads of the same listing share one fetcher call. The
    /// loading state of the path is set until this call returns or is
    /// dropped.
    ///
    /// # Errors
    /// Returns the shared [`FetchError`] of the load.
    pub async fn load_directory(
        &self,
        repository: &str,
        path: &str,
        fetcher: Arc<dyn DirectoryFetcher>,
    ) -> Result<Vec<FileNode>, FetchError> {
        let path = normalize_path(path).to_owned();
        let key = listing_key(repository, &path);
        self.set_loading(repository, &path, true);
        let _loading = LoadingGuard {
            cache: self,
            repository,
            path: &path,
        };

        let cache = self.clone();
        let repository_owned = repository.to_owned();
        let path_owned = path.clone();
        let outcome = self.inner.loads.join_or_start(&key, move |cancel| async move {
            let mut files = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                fetched = fetcher.fetch_directory_listing(&repository_owned, &path_owned) => fetched?,
            };
            sort_listing(&mut files);
            if !cancel.is_cancelled() {
                cache
                    .put_directory(&repository_owned, &path_owned, files.clone())
                    .await;
            }
            Ok(files)
        });

        outcome.await
    }

    /// Fetch and cache up to the configured number of uncached child
    /// directories of `files`, the listing of `path`, with bounded
    /// parallelism.
    ///
    /// Failures are logged and do not affect siblings. Returns how many
    /// children were loaded.
    pub async fn prefetch_children(
        &self,
        repository: &str,
        path: &str,
        files: &[FileNode],
        fetcher: Arc<dyn DirectoryFetcher>,
    ) -> usize {
        let mut targets = Vec::new();
        for node in files.iter().filter(|node| node.is_directory) {
            if targets.len() >= self.inner.options.child_limit {
                break;
            }
            let child = child_path(path, node);
            if !self.is_cached(repository, &child).await
                && !self.is_load_in_flight(repository, &child)
            {
                targets.push(child);
            }
        }
        if targets.is_empty() {
            return 0;
        }

        debug!(repository, count = targets.len(), "Prefetching child directories");
        stream::iter(targets)
            .map(|child| {
                let fetcher = Arc::clone(&fetcher);
                async move {
                    match self.load_directory(repository, &child, fetcher).await {
                        Ok(_) => true,
                        Err(err) => {
                            warn!(repository, path = %child, error = %err, "Child prefetch failed");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.inner.options.concurrency.max(1))
            .filter(|loaded| std::future::ready(*loaded))
            .count()
            .await
    }

    /// Whether an unexpired listing for `path` exists in either tier.
    pub async fn is_cached(&self, repository: &str, path: &str) -> bool {
        let path = normalize_path(path);
        let now = self.inner.clock.now();
        let in_memory = self
            .lock_state()
            .listings
            .peek(&listing_key(repository, path))
            .is_some_and(|listing| !TtlClass::TreeStructure.is_expired(listing.cached_at, now));
        in_memory || self.inner.cache.contains(&typed_key(repository, path)).await
    }

    /// Whether a load of `path` is currently in flight.
    #[must_use]
    pub fn is_load_in_flight(&self, repository: &str, path: &str) -> bool {
        self.inner
            .loads
            .contains(&listing_key(repository, normalize_path(path)))
    }

    /// Whether `path` is marked as loading.
    #[must_use]
    pub fn is_loading(&self, repository: &str, path: &str) -> bool {
        let key = listing_key(repository, normalize_path(path));
        self.inner.loading.borrow().contains(&key)
    }

    /// Mark or unmark `path` as loading.
    pub fn set_loading(&self, repository: &str, path: &str, loading: bool) {
        let key = listing_key(repository, normalize_path(path));
        self.inner.loading.send_if_modified(|keys| {
            if loading {
                keys.insert(key)
            } else {
                keys.remove(&key)
            }
        });
    }

    /// Observe the set of path keys (`"{repository}:{path}"`) being loaded.
    #[must_use]
    pub fn subscribe_loading(&self) -> watch::Receiver<BTreeSet<String>> {
        self.inner.loading.subscribe()
    }

    /// Drop in-process listings and the tree aggregate of `repository`.
    pub fn clear(&self, repository: &str) {
        let prefix = format!("{repository}:");
        let mut state = self.lock_state();
        state.listings.retain(|key, _| !key.starts_with(&prefix));
        state.trees.remove(repository);
        drop(state);
        debug!(repository, "Cleared directory cache");
    }

    /// Tree aggregate of `repository`, rebuilt from in-process listings when
    /// none is held.
    #[must_use]
    pub fn load_repository_tree(&self, repository: &str) -> Option<RepositoryTree> {
        let now = self.inner.clock.now();
        let mut state = self.lock_state();
        if let Some(tree) = state.trees.get(repository) {
            return Some(tree.clone());
        }

        let prefix = format!("{repository}:");
        let directories: BTreeMap<String, Vec<FileNode>> = state
            .listings
            .iter()
            .filter(|(key, listing)| {
                key.starts_with(&prefix)
                    && !TtlClass::TreeStructure.is_expired(listing.cached_at, now)
            })
            .map(|(_, listing)| (listing.path.clone(), listing.files.clone()))
            .collect();
        if directories.is_empty() {
            return None;
        }

        debug!(repository, directories = directories.len(), "Rebuilt repository tree");
        let tree = RepositoryTree {
            repository: repository.to_owned(),
            directories,
            cached_at: now,
        };
        state.trees.insert(repository.to_owned(), tree.clone());
        Some(tree)
    }

    /// Store a full tree aggregate and seed the per-path tiers from it.
    pub async fn save_repository_tree(
        &self,
        repository: &str,
        directories: BTreeMap<String, Vec<FileNode>>,
    ) {
        let directories: BTreeMap<String, Vec<FileNode>> = directories
            .into_iter()
            .map(|(path, mut files)| {
                sort_listing(&mut files);
                (normalize_path(&path).to_owned(), files)
            })
            .collect();

        let tree = RepositoryTree {
            repository: repository.to_owned(),
            directories: directories.clone(),
            cached_at: self.inner.clock.now(),
        };
        self.lock_state().trees.insert(repository.to_owned(), tree);

        for (path, files) in directories {
            self.put_directory(repository, &path, files).await;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DirectoryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a path's loading mark when its load ends or is abandoned.
struct LoadingGuard<'a> {
    cache: &'a DirectoryCache,
    repository: &'a str,
    path: &'a str,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.cache.set_loading(self.repository, self.path, false);
    }
}

fn listing_key(repository: &str, path: &str) -> String {
    format!("{repository}:{path}")
}

/// Path of `node` inside the directory `parent`. Listings normally carry
/// full paths; a bare node is joined onto its parent.
pub(crate) fn child_path(parent: &str, node: &FileNode) -> String {
    let own = normalize_path(&node.path);
    if !own.is_empty() {
        return own.to_owned();
    }
    match normalize_path(parent) {
        "" => node.name.clone(),
        parent => format!("{parent}/{}", node.name),
    }
}

fn typed_key(repository: &str, path: &str) -> ResourceKey {
    ResourceKey::new(&format!("directory:{repository}:{path}"))
}
