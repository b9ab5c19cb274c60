//! Cache services for gitview.
//!
//! This crate layers request coordination, directory listing caching and
//! access-driven prefetching on top of the storage crate, and provides the
//! configuration and composition root shared by front ends.

pub mod access_log;
pub mod config;
pub mod directory_cache;
pub mod error;
pub mod in_flight;
pub mod prefetch;
pub mod request;
pub mod services;
pub mod snapshot;
pub mod transport;

// Re-exports for convenience
pub use access_log::{ACCESS_TABLE, AccessLog};
pub use config::{
    CacheConfig, DirectoryConfig, DiskConfig, MemoryConfig, PrefetchConfig, default_cache_dir,
};
pub use directory_cache::{DirectoryCache, DirectoryCacheOptions, DirectoryListing, RepositoryTree};
pub use error::{FetchError, TransportError};
pub use in_flight::{InFlightTable, Joined, SharedFetch};
pub use prefetch::{PrefetchScheduler, PrefetchSettings};
pub use request::RequestCoordinator;
pub use services::CacheServices;
pub use snapshot::{REPOSITORY_LIST_TABLE, RepositoryListSnapshot, SnapshotStore};
pub use transport::{DirectoryFetcher, Transport};
