use crate::{
    cache::CacheWriter,
    metrics::SyncMetrics,
    source::{NamespaceSource, WatchEvent},
};
use futures::prelude::*;
use tokio::{sync::watch, time};
use tracing::{debug, info, trace, warn};


pub const DEFAULT_RESYNC_INTERVAL: time::Duration = time::Duration::from_secs(5 * 60);

const DEFAULT_BACKOFF: time::Duration = time::Duration::from_secs(1);

/// The synchronizer's progress.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// No listing has been attempted.
    Unsynced,

    /// The initial listing is in progress (or being retried).
    Listing,

    /// Watch events are being applied.
    Watching,

    /// A listing is in progress after a watch ended.
    Resyncing,
}

/// Keeps a namespace cache current by listing and then watching a `NamespaceSource`.
///
/// The synchronizer is the cache's only writer. It runs until its task is dropped; failures are
/// logged and retried, never returned.
pub struct Synchronizer<S> {
    source: S,
    cache: CacheWriter,

    /// A watch that delivers no events for this long is abandoned and the cache is relisted.
    resync_interval: time::Duration,

    /// Delay before retrying a failed list or watch.
    backoff: time::Duration,

    state: watch::Sender<SyncState>,
    metrics: SyncMetrics,
}

/// Why a watch ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Resync {
    Initial,
    StreamError,
    StreamClosed,
    Idle,
}

// === impl Synchronizer ===

impl<S: NamespaceSource> Synchronizer<S> {
    pub fn new(source: S, cache: CacheWriter) -> Self {
        let (state, _) = watch::channel(SyncState::Unsynced);
        Self {
            source,
            cache,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            backoff: DEFAULT_BACKOFF,
            state,
            metrics: SyncMetrics::default(),
        }
    }

    pub fn with_resync_interval(mut self, interval: time::Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: time::Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Observes state transitions.
    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Lists and watches namespaces forever.
    pub async fn run(mut self) {
        let mut reason = Resync::Initial;
        loop {
            self.set_state(if reason == Resync::Initial {
                SyncState::Listing
            } else {
                SyncState::Resyncing
            });

            let version = match self.source.list().await {
                Ok(listing) => {
                    let count = listing.items.len();
                    self.cache.replace(listing.items);
                    self.metrics.resync(reason.as_str());
                    self.metrics.set_size(self.cache.len());
                    info!(namespaces = count, version = %listing.resource_version, "Listed");
                    listing.resource_version
                }
                Err(error) => {
                    warn!(%error, "Failed to list namespaces");
                    time::sleep(self.backoff).await;
                    continue;
                }
            };

            self.set_state(SyncState::Watching);
            reason = self.watch(&version).await;
            info!(reason = reason.as_str(), "Resyncing");
        }
    }

    /// Applies watch events until the stream ends, fails, or goes idle.
    async fn watch(&mut self, version: &str) -> Resync {
        let mut events = match self.source.watch(version).await {
            Ok(events) => events,
            Err(error) => {
                info!(%error, "Failed to watch namespaces");
                time::sleep(self.backoff).await;
                return Resync::StreamError;
            }
        };

        loop {
            match time::timeout(self.resync_interval, events.next()).await {
                Ok(Some(Ok(event))) => self.apply(event),
                Ok(Some(Err(error))) => {
                    info!(%error, "Watch failed");
                    time::sleep(self.backoff).await;
                    return Resync::StreamError;
                }
                Ok(None) => {
                    debug!("Watch closed");
                    return Resync::StreamClosed;
                }
                Err(_) => {
                    info!(timeout = ?self.resync_interval, "Watch idle");
                    return Resync::Idle;
                }
            }
        }
    }

    fn apply(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Added(ns) => {
                trace!(name = %ns.name, "Added");
                self.metrics.event("added");
                self.cache.apply(ns);
            }
            WatchEvent::Modified(ns) => {
                trace!(name = %ns.name, "Modified");
                self.metrics.event("modified");
                self.cache.apply(ns);
            }
            WatchEvent::Deleted(ns) => {
                trace!(name = %ns.name, "Deleted");
                self.metrics.event("deleted");
                self.cache.delete(&ns.name);
            }
            WatchEvent::Bookmark => {
                self.metrics.event("bookmark");
                return;
            }
        }
        self.metrics.set_size(self.cache.len());
    }

    fn set_state(&self, state: SyncState) {
        let prior = self.state.send_replace(state);
        if prior != state {
            debug!(?prior, ?state, "Transitioned");
        }
    }
}

// === impl Resync ===

impl Resync {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::StreamError => "stream_error",
            Self::StreamClosed => "stream_closed",
            Self::Idle => "idle",
        }
    }
}
