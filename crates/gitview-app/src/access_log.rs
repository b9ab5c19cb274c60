//! Durable log of per-path access patterns.

use std::collections::HashMap;
use std::sync::Arc;

use gitview_core::{AccessPattern, Clock};
use gitview_store::{TableStore, load_json, save_json};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Table holding the persisted patterns.
pub const ACCESS_TABLE: &str = "access-patterns";

struct AccessState {
    patterns: HashMap<(String, String), AccessPattern>,
    unflushed: usize,
}

/// Access patterns keyed by `(repository, path)`, flushed every
/// `flush_every` updates and on demand.
pub struct AccessLog {
    tables: Arc<dyn TableStore>,
    clock: Arc<dyn Clock>,
    flush_every: usize,
    state: Mutex<AccessState>,
}

impl AccessLog {
    /// Load persisted patterns, dropping those last accessed more than
    /// `retention` ago. An unreadable table starts an empty log.
    pub async fn load(
        tables: Arc<dyn TableStore>,
        clock: Arc<dyn Clock>,
        flush_every: usize,
        retention: Duration,
    ) -> Self {
        let now = clock.now();
        let stored: Vec<AccessPattern> = match load_json(tables.as_ref(), ACCESS_TABLE).await {
            Ok(stored) => stored.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "Discarding unreadable access patterns");
                Vec::new()
            }
        };

        let total = stored.len();
        let patterns: HashMap<_, _> = stored
            .into_iter()
            .filter(|pattern| !pattern.is_stale(now, retention))
            .map(|pattern| ((pattern.repository.clone(), pattern.path.clone()), pattern))
            .collect();
        if patterns.len() < total {
            debug!(pruned = total - patterns.len(), "Pruned stale access patterns");
        }

        Self {
            tables,
            clock,
            flush_every: flush_every.max(1),
            state: Mutex::new(AccessState {
                patterns,
                unflushed: 0,
            }),
        }
    }

    /// Record an access to `(repository, path)` and return the updated
    /// pattern. Every `flush_every`-th update persists the log.
    pub async fn record(&self, repository: &str, path: &str) -> AccessPattern {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let pattern = state
            .patterns
            .entry((repository.to_owned(), path.to_owned()))
            .and_modify(|pattern| pattern.record(now))
            .or_insert_with(|| AccessPattern::first_access(repository, path, now))
            .clone();

        state.unflushed += 1;
        if state.unflushed >= self.flush_every {
            self.persist(&mut state).await;
        }
        pattern
    }

    /// Pattern recorded for `(repository, path)`.
    pub async fn get(&self, repository: &str, path: &str) -> Option<AccessPattern> {
        let state = self.state.lock().await;
        state
            .patterns
            .get(&(repository.to_owned(), path.to_owned()))
            .cloned()
    }

    /// Up to `limit` patterns, highest desirability at `now` first.
    pub async fn ranked(&self, now: OffsetDateTime, limit: usize) -> Vec<AccessPattern> {
        let state = self.state.lock().await;
        let mut scored: Vec<(f64, &AccessPattern)> = state
            .patterns
            .values()
            .map(|pattern| (pattern.score(now), pattern))
            .collect();
        scored.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .total_cmp(a_score)
                .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
                .then_with(|| (&a.repository, &a.path).cmp(&(&b.repository, &b.path)))
        });
        scored
            .into_iter()
            .take(limit)
            .map(|(_, pattern)| pattern.clone())
            .collect()
    }

    /// Number of known patterns.
    pub async fn len(&self) -> usize {
        self.state.lock().await.patterns.len()
    }

    /// Whether no pattern is known.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Persist the log now.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        self.persist(&mut state).await;
    }

    async fn persist(&self, state: &mut AccessState) {
        let mut patterns: Vec<&AccessPattern> = state.patterns.values().collect();
        patterns.sort_by(|a, b| (&a.repository, &a.path).cmp(&(&b.repository, &b.path)));
        match save_json(self.tables.as_ref(), ACCESS_TABLE, &patterns).await {
            Ok(()) => {
                debug!(count = patterns.len(), "Flushed access patterns");
                state.unflushed = 0;
            }
            Err(err) => warn!(error = %err, "Failed to persist access patterns"),
        }
    }
}
