use ahash::AHashMap as HashMap;
use k8s_openapi::api::core::v1::Namespace;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

/// The parts of a `Namespace` that policies consult.
///
/// Snapshots are immutable once cached; an update replaces the whole value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceMetadata {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
}

/// A read handle on the namespace cache. Cheap to clone.
#[derive(Clone, Debug)]
pub struct MetadataCache(Shared);

/// The cache's only write handle, held by the synchronizer.
#[derive(Debug)]
pub struct CacheWriter(Shared);

type Shared = Arc<RwLock<State>>;

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,

    /// Incremented on every write.
    generation: u64,
}

#[derive(Clone, Debug)]
enum Entry {
    Present(Arc<NamespaceMetadata>),

    /// Records a deletion observed on the watch. Cleared by the next full replace.
    Deleted,
}

/// Creates a cache with a single writer.
pub fn pair() -> (CacheWriter, MetadataCache) {
    let shared = Shared::default();
    (CacheWriter(shared.clone()), MetadataCache(shared))
}

// === impl NamespaceMetadata ===

impl NamespaceMetadata {
    pub fn new(
        name: impl Into<String>,
        annotations: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            name: name.into(),
            annotations: annotations.into_iter().collect(),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

impl From<Namespace> for NamespaceMetadata {
    fn from(ns: Namespace) -> Self {
        Self {
            name: ns.metadata.name.unwrap_or_default(),
            annotations: ns.metadata.annotations.unwrap_or_default(),
        }
    }
}

// === impl MetadataCache ===

impl MetadataCache {
    /// Looks up a namespace by exact name.
    ///
    /// The returned snapshot is never modified; later updates install a new snapshot.
    pub fn get(&self, name: &str) -> Option<Arc<NamespaceMetadata>> {
        match self.0.read().entries.get(name)? {
            Entry::Present(ns) => Some(ns.clone()),
            Entry::Deleted => None,
        }
    }

    /// The number of live namespaces.
    pub fn len(&self) -> usize {
        self.0.read().live()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of writes applied since the cache was created.
    pub fn generation(&self) -> u64 {
        self.0.read().generation
    }
}

// === impl CacheWriter ===

impl CacheWriter {
    /// Installs a namespace snapshot, replacing any prior entry with the same name.
    pub fn apply(&mut self, ns: NamespaceMetadata) {
        let name = ns.name.clone();
        let mut state = self.0.write();
        state.entries.insert(name, Entry::Present(Arc::new(ns)));
        state.generation += 1;
    }

    /// Removes a namespace, leaving a tombstone in its place.
    pub fn delete(&mut self, name: &str) {
        let mut state = self.0.write();
        state.entries.insert(name.to_string(), Entry::Deleted);
        state.generation += 1;
    }

    /// Replaces the entire contents of the cache.
    ///
    /// The new map is built before the lock is taken so readers observe either the old contents or
    /// the new contents, never a mix.
    pub fn replace(&mut self, namespaces: impl IntoIterator<Item = NamespaceMetadata>) {
        let entries = namespaces
            .into_iter()
            .map(|ns| (ns.name.clone(), Entry::Present(Arc::new(ns))))
            .collect::<HashMap<_, _>>();

        let prior = {
            let mut state = self.0.write();
            state.generation += 1;
            std::mem::replace(&mut state.entries, entries)
        };
        // The old map is dropped outside of the lock.
        drop(prior);
    }

    pub fn len(&self) -> usize {
        self.0.read().live()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// === impl State ===

impl State {
    fn live(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::Present(_)))
            .count()
    }
}
