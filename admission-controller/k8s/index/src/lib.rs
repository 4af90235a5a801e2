//! Namespace metadata index
//!
//! Admission policies that depend on namespace configuration (e.g. a `RunAsUser` annotation) read
//! it from a process-local `MetadataCache` rather than querying the API server on each request. The
//! cache is owned by a single `Synchronizer` task that keeps it current:
//!
//! ```text
//! Unsynced -> Listing -> Watching -> Resyncing -> Watching -> ...
//! ```
//!
//! - On `Listing`/`Resyncing`, every namespace is listed and the cache contents are swapped for
//!   the listing in a single write.
//! - On `Watching`, added/modified/deleted events are applied one key at a time, in the order they
//!   are received.
//! - When the watch stream fails, closes, or stays idle past the configured resync interval, the
//!   synchronizer resyncs.
//!
//! Readers never wait for the synchronizer. A lookup returns whatever snapshot is currently
//! installed, so a namespace created moments ago may not be visible yet. This staleness window is
//! bounded by watch delivery latency plus the time to relist after a failure.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
pub mod metrics;
mod source;
mod sync;

pub use self::{
    cache::{pair, CacheWriter, MetadataCache, NamespaceMetadata},
    metrics::SyncMetrics,
    source::{EventStream, KubeNamespaces, Listing, NamespaceSource, WatchEvent},
    sync::{SyncState, Synchronizer, DEFAULT_RESYNC_INTERVAL},
};
