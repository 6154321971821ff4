//! Read-through endpoint index cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::file::EndpointSet;

/// Cache key: one namespace, or every namespace at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamespaceScope {
    All,
    Namespace(String),
}

impl NamespaceScope {
    pub fn matches(&self, namespace: &str) -> bool {
        match self {
            NamespaceScope::All => true,
            NamespaceScope::Namespace(ns) => ns == namespace,
        }
    }
}

/// Per-scope endpoint sets, loaded on first use.
///
/// Loads are tagged with the snapshot generation they read. Sets loaded from
/// a generation older than the current one are returned but never cached.
#[derive(Debug, Clone, Default)]
pub struct EndpointCache {
    inner: Arc<DashMap<NamespaceScope, Arc<Vec<EndpointSet>>>>,
    generation: Arc<AtomicU64>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached sets for `scope`, calling `load` on a miss.
    ///
    /// `generation` is the snapshot generation `load` reads from.
    pub fn get_or_load<F>(
        &self,
        scope: NamespaceScope,
        generation: u64,
        load: F,
    ) -> Arc<Vec<EndpointSet>>
    where
        F: FnOnce() -> Vec<EndpointSet>,
    {
        if generation < self.generation() {
            return Arc::new(load());
        }
        if let Some(hit) = self.inner.get(&scope) {
            return Arc::clone(hit.value());
        }
        let loaded = Arc::new(load());
        tracing::trace!(scope = ?scope, generation, sets = loaded.len(), "Endpoint cache miss");

        // Checked under the shard lock: an invalidation that advanced the
        // generation first makes us skip the insert, one that runs later
        // removes what we inserted.
        match self.inner.entry(scope) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                if generation < self.generation() {
                    return loaded;
                }
                entry.insert(Arc::clone(&loaded));
                loaded
            }
        }
    }

    /// Mark `generation` as current. Must be called after the new snapshot
    /// is visible and before invalidating.
    pub fn advance(&self, generation: u64) {
        self.generation.fetch_max(generation, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Drop one namespace. The all-namespaces entry goes with it.
    pub fn invalidate(&self, namespace: &str) {
        self.inner
            .remove(&NamespaceScope::Namespace(namespace.to_string()));
        self.inner.remove(&NamespaceScope::All);
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
