//! Access-driven prefetching of directory listings.
//!
//! Two loops feed the [`DirectoryCache`]: a reactive one triggered by every
//! tracked access (siblings and children of the visited path), and a
//! periodic sweep over the highest-scoring access patterns. Prefetch
//! failures are logged and never reach the caller.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use gitview_core::{AccessPattern, Clock, normalize_path, parent_path};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access_log::AccessLog;
use crate::directory_cache::{DirectoryCache, child_path};
use crate::transport::DirectoryFetcher;

/// Tunables of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchSettings {
    /// Period of the background sweep.
    pub interval: Duration,
    /// Patterns visited per sweep.
    pub sweep_limit: usize,
    /// Siblings and children fetched per tracked access (each).
    pub reactive_limit: usize,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            sweep_limit: 10,
            reactive_limit: 3,
        }
    }
}

struct SchedulerInner {
    directories: DirectoryCache,
    fetcher: Arc<dyn DirectoryFetcher>,
    access: AccessLog,
    clock: Arc<dyn Clock>,
    settings: PrefetchSettings,
    sweeping: AtomicBool,
    prefetching: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the prefetch scheduler. Clones share state.
#[derive(Clone)]
pub struct PrefetchScheduler {
    inner: Arc<SchedulerInner>,
}

impl PrefetchScheduler {
    /// Create a scheduler. The background sweep starts with
    /// [`start`](Self::start).
    pub fn new(
        directories: DirectoryCache,
        fetcher: Arc<dyn DirectoryFetcher>,
        access: AccessLog,
        clock: Arc<dyn Clock>,
        settings: PrefetchSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                directories,
                fetcher,
                access,
                clock,
                settings,
                sweeping: AtomicBool::new(false),
                prefetching: Mutex::new(HashSet::new()),
                shutdown: CancellationToken::new(),
                sweep_task: Mutex::new(None),
            }),
        }
    }

    /// Record an access to `(repository, path)` and warm its neighbourhood
    /// in the background.
    pub async fn track_access(&self, repository: &str, path: &str) -> AccessPattern {
        let path = normalize_path(path);
        let pattern = self.inner.access.record(repository, path).await;
        if self.inner.shutdown.is_cancelled() {
            return pattern;
        }

        let inner = Arc::clone(&self.inner);
        let repository = repository.to_owned();
        let path = path.to_owned();
        tokio::spawn(async move {
            inner.prefetch_around(&repository, &path).await;
        });
        pattern
    }

    /// Prefetch up to the reactive limit of uncached siblings and children
    /// of `path`, using already-cached listings only. Returns how many
    /// listings were loaded.
    pub async fn prefetch_around(&self, repository: &str, path: &str) -> usize {
        self.inner.prefetch_around(repository, path).await
    }

    /// Prefetch the top-ranked access patterns one by one, stopping early on
    /// shutdown. A call while another sweep runs does nothing.
    pub async fn prefetch_common_repositories(&self) -> usize {
        self.inner.sweep().await
    }

    /// Whether a sweep is in progress.
    #[must_use]
    pub fn is_prefetching(&self) -> bool {
        self.inner.sweeping.load(Ordering::Acquire)
    }

    /// Access log backing the scheduler.
    #[must_use]
    pub fn access_log(&self) -> &AccessLog {
        &self.inner.access
    }

    /// Start the periodic sweep. Starting twice has no effect.
    pub fn start(&self) {
        let mut task = self
            .inner
            .sweep_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.sweep().await;
                    }
                }
            }
            debug!("Prefetch sweep stopped");
        }));
        drop(task);
        info!(interval_secs = self.inner.settings.interval.as_secs(), "Prefetch sweep started");
    }

    /// Stop the sweep, wait for it to finish and flush the access log.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self
            .inner
            .sweep_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!(error = %err, "Prefetch sweep ended abnormally");
        }
        self.inner.access.flush().await;
    }
}

/// Clears the sweeping flag when a sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SchedulerInner {
    async fn prefetch_around(&self, repository: &str, path: &str) -> usize {
        let path = normalize_path(path);
        let mut targets = Vec::new();

        if let Some(parent) = parent_path(path)
            && let Some(siblings) = self.directories.get_directory(repository, parent).await
        {
            let candidates = siblings
                .iter()
                .filter(|node| node.is_directory)
                .map(|node| child_path(parent, node))
                .filter(|sibling| sibling != path);
            targets.extend(self.select_uncached(repository, candidates).await);
        }

        if let Some(children) = self.directories.get_directory(repository, path).await {
            let candidates = children
                .iter()
                .filter(|node| node.is_directory)
                .map(|node| child_path(path, node));
            targets.extend(self.select_uncached(repository, candidates).await);
        }

        if targets.is_empty() {
            return 0;
        }
        debug!(repository, path, count = targets.len(), "Reactive prefetch");
        join_all(targets.iter().map(|target| self.prefetch_one(repository, target)))
            .await
            .into_iter()
            .filter(|loaded| *loaded)
            .count()
    }

    async fn select_uncached(
        &self,
        repository: &str,
        candidates: impl Iterator<Item = String>,
    ) -> Vec<String> {
        let mut selected = Vec::new();
        for candidate in candidates {
            if selected.len() >= self.settings.reactive_limit {
                break;
            }
            if !self.should_skip(repository, &candidate).await {
                selected.push(candidate);
            }
        }
        selected
    }

    async fn sweep(&self) -> usize {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            debug!("Prefetch sweep already running");
            return 0;
        }
        let _guard = SweepGuard(&self.sweeping);

        let ranked = self
            .access
            .ranked(self.clock.now(), self.settings.sweep_limit)
            .await;
        let mut loaded = 0;
        for pattern in ranked {
            if self.shutdown.is_cancelled() {
                debug!("Prefetch sweep cancelled");
                break;
            }
            if self.should_skip(&pattern.repository, &pattern.path).await {
                continue;
            }
            if self.prefetch_one(&pattern.repository, &pattern.path).await {
                loaded += 1;
            }
        }
        if loaded > 0 {
            debug!(loaded, "Prefetch sweep finished");
        }
        loaded
    }

    async fn should_skip(&self, repository: &str, path: &str) -> bool {
        self.is_marked(repository, path)
            || self.directories.is_load_in_flight(repository, path)
            || self.directories.is_cached(repository, path).await
    }

    async fn prefetch_one(&self, repository: &str, path: &str) -> bool {
        let key = format!("{repository}:{path}");
        if !self.mark(&key) {
            return false;
        }
        let result = self
            .directories
            .load_directory(repository, path, Arc::clone(&self.fetcher))
            .await;
        self.unmark(&key);

        match result {
            Ok(files) => {
                debug!(repository, path, entries = files.len(), "Prefetched listing");
                true
            }
            Err(err) => {
                warn!(repository, path, error = %err, "Prefetch failed");
                false
            }
        }
    }

    fn is_marked(&self, repository: &str, path: &str) -> bool {
        self.prefetching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&format!("{repository}:{path}"))
    }

    fn mark(&self, key: &str) -> bool {
        self.prefetching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned())
    }

    fn unmark(&self, key: &str) {
        self.prefetching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
