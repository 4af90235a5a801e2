use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Describes the namespace synchronizer's activity.
#[derive(Clone, Debug, Default)]
pub struct SyncMetrics {
    cache_size: Gauge,
    events: Family<EventLabels, Counter>,
    resyncs: Family<ResyncLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResyncLabels {
    reason: String,
}

// === impl SyncMetrics ===

impl SyncMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let cache_size = Gauge::default();
        prom.register(
            "namespace_cache_size",
            "Gauge of the number of namespaces in the cache",
            cache_size.clone(),
        );

        let events = Family::default();
        prom.register(
            "namespace_cache_events",
            "Count of watch events applied to the cache",
            events.clone(),
        );

        let resyncs = Family::default();
        prom.register(
            "namespace_cache_resyncs",
            "Count of full listings that replaced the cache",
            resyncs.clone(),
        );

        Self {
            cache_size,
            events,
            resyncs,
        }
    }

    pub(crate) fn set_size(&self, size: usize) {
        self.cache_size.set(size as i64);
    }

    pub(crate) fn event(&self, kind: &str) {
        self.events
            .get_or_create(&EventLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub(crate) fn resync(&self, reason: &str) {
        self.resyncs
            .get_or_create(&ResyncLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}
