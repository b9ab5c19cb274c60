//! Time-to-live classes and the policy resolver that maps resource
//! identifiers onto them.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Default TTL applied to typed values when the caller does not pick one.
pub const DEFAULT_DATA_TTL: Duration = Duration::from_secs(HOUR);

/// Named time-to-live bucket assigned to a kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TtlClass {
    /// Site index listing every repository (7 days).
    RepositoryList,
    /// Any repository page without a more specific marker (24 hours).
    RepositoryDetail,
    /// Logs, single commits and diffs (12 hours).
    CommitHistory,
    /// Blob / raw file content (1 hour).
    FileContent,
    /// Directory listings (24 hours).
    TreeStructure,
    /// Branch and tag listings (4 hours).
    Refs,
    /// Repository summary pages (2 hours).
    Summary,
    /// About / readme pages (48 hours).
    About,
    /// Caller-supplied duration.
    Custom(Duration),
}

impl TtlClass {
    /// Time-to-live granted to entries of this class.
    #[must_use]
    pub const fn ttl(self) -> Duration {
        match self {
            Self::RepositoryList => Duration::from_secs(7 * DAY),
            Self::RepositoryDetail | Self::TreeStructure => Duration::from_secs(DAY),
            Self::CommitHistory => Duration::from_secs(12 * HOUR),
            Self::FileContent => Duration::from_secs(HOUR),
            Self::Refs => Duration::from_secs(4 * HOUR),
            Self::Summary => Duration::from_secs(2 * HOUR),
            Self::About => Duration::from_secs(2 * DAY),
            Self::Custom(ttl) => ttl,
        }
    }

    /// Instant at which an entry created at `created_at` expires, or `None`
    /// when the TTL reaches past the representable range.
    #[must_use]
    pub fn expires_at(self, created_at: OffsetDateTime) -> Option<OffsetDateTime> {
        time::Duration::try_from(self.ttl())
            .ok()
            .and_then(|ttl| created_at.checked_add(ttl))
    }

    /// Whether an entry created at `created_at` is expired at `now`.
    ///
    /// An entry is still fresh at exactly `created_at + ttl`.
    #[must_use]
    pub fn is_expired(self, created_at: OffsetDateTime, now: OffsetDateTime) -> bool {
        self.expires_at(created_at)
            .is_some_and(|expires_at| now > expires_at)
    }

    /// Class used by the typed cache when no explicit class is given.
    #[must_use]
    pub const fn default_data() -> Self {
        Self::Custom(DEFAULT_DATA_TTL)
    }

    /// Stable short name, used for display and logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RepositoryList => "repositoryList",
            Self::RepositoryDetail => "repositoryDetail",
            Self::CommitHistory => "commitHistory",
            Self::FileContent => "fileContent",
            Self::TreeStructure => "treeStructure",
            Self::Refs => "refs",
            Self::Summary => "summary",
            Self::About => "about",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for TtlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(ttl) => write!(f, "custom({}s)", ttl.as_secs()),
            other => f.write_str(other.name()),
        }
    }
}

/// Marker groups in precedence order. The first group with a matching path
/// segment decides the class.
const MARKERS: &[(&[&str], TtlClass)] = &[
    (&["tree"], TtlClass::TreeStructure),
    (&["blob", "plain", "raw"], TtlClass::FileContent),
    (&["log", "commit", "diff", "patch"], TtlClass::CommitHistory),
    (&["refs", "tag"], TtlClass::Refs),
    (&["about"], TtlClass::About),
    (&["summary"], TtlClass::Summary),
];

/// Resolve the TTL class for a resource identifier.
///
/// Total and pure: every input yields a class.
#[must_use]
pub fn resolve_policy(identifier: &str) -> TtlClass {
    let segments: Vec<&str> = path_of(identifier)
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    for (markers, class) in MARKERS {
        if segments.iter().any(|segment| markers.contains(segment)) {
            return *class;
        }
    }

    match segments.len() {
        0 => TtlClass::RepositoryList,
        1 => TtlClass::Summary,
        _ => TtlClass::RepositoryDetail,
    }
}

/// Path component of a URL-like identifier: without `scheme://host`,
/// query string and fragment.
fn path_of(identifier: &str) -> &str {
    let trimmed = identifier.trim();
    let without_fragment = trimmed.split_once('#').map_or(trimmed, |(head, _)| head);
    let without_query = without_fragment
        .split_once('?')
        .map_or(without_fragment, |(head, _)| head);
    match without_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |idx| &rest[idx..]),
        None => without_query,
    }
}
