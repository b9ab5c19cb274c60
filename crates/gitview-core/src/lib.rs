//! Domain types for the gitview caching layer: TTL classes and the policy
//! resolver, resource keys, directory listing order, access patterns and the
//! clock abstraction.

/// Access pattern bookkeeping and scoring.
pub mod access;
/// Clock abstraction.
pub mod clock;
/// Directory listing nodes and their canonical order.
pub mod file_node;
/// Resource key normalization.
pub mod key;
/// Repository-relative path helpers.
pub mod path;
/// TTL classes and the policy resolver.
pub mod policy;

pub use access::AccessPattern;
pub use clock::{Clock, ManualClock, SystemClock};
pub use file_node::{FileNode, is_canonical, listing_order, sort_listing};
pub use key::ResourceKey;
pub use path::{normalize_path, parent_path};
pub use policy::{DEFAULT_DATA_TTL, TtlClass, resolve_policy};
