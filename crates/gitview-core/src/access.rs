//! Per-path access bookkeeping and the desirability score used to rank
//! prefetch candidates.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Days after which recency stops contributing to the score.
pub const RECENCY_WINDOW_DAYS: f64 = 30.0;
/// Access count at which frequency saturates.
pub const FREQUENCY_SATURATION: f64 = 10.0;
/// Weight of the recency component.
pub const RECENCY_WEIGHT: f64 = 0.7;
/// Weight of the frequency component.
pub const FREQUENCY_WEIGHT: f64 = 0.3;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Access history of one `(repository, path)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPattern {
    /// Repository the path belongs to.
    pub repository: String,
    /// Repository-relative path.
    pub path: String,
    /// Number of recorded accesses.
    pub access_count: u64,
    /// Time of the most recent access.
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed_at: OffsetDateTime,
}

impl AccessPattern {
    /// Pattern for a first access at `now`.
    pub fn first_access(
        repository: impl Into<String>,
        path: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            repository: repository.into(),
            path: path.into(),
            access_count: 1,
            last_accessed_at: now,
        }
    }

    /// Record another access at `now`.
    pub fn record(&mut self, now: OffsetDateTime) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now;
    }

    /// Desirability in `[0, 1]`: `0.7 * recency + 0.3 * frequency`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, now: OffsetDateTime) -> f64 {
        let days = (now - self.last_accessed_at).as_seconds_f64() / SECONDS_PER_DAY;
        let recency = (1.0 - days.max(0.0) / RECENCY_WINDOW_DAYS).clamp(0.0, 1.0);
        let frequency = (self.access_count as f64 / FREQUENCY_SATURATION).min(1.0);
        RECENCY_WEIGHT.mul_add(recency, FREQUENCY_WEIGHT * frequency)
    }

    /// Whether the last access happened more than `retention` before `now`.
    #[must_use]
    pub fn is_stale(&self, now: OffsetDateTime, retention: Duration) -> bool {
        now - self.last_accessed_at > retention
    }
}
