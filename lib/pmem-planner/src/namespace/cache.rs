use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tracing::trace;

use super::{NamespaceCache, NamespaceDetails, NamespaceDiscovery};

#[derive(Debug, Default)]
struct State {
    namespaces: Option<Vec<NamespaceDiscovery>>,
    details: HashMap<String, NamespaceDetails>,
}

/// An in-memory namespace cache.
///
/// Clones share the same underlying state.
#[derive(Clone, Debug, Default)]
pub struct InMemoryNamespaceCache {
    state: Arc<RwLock<State>>,
}

impl InMemoryNamespaceCache {
    /// Creates an empty `InMemoryNamespaceCache`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        let state = self.state.read().unwrap();
        state.namespaces.is_none() && state.details.is_empty()
    }
}

impl NamespaceCache for InMemoryNamespaceCache {
    fn namespaces(&self) -> Option<Vec<NamespaceDiscovery>> {
        self.state.read().unwrap().namespaces.clone()
    }

    fn set_namespaces(&self, namespaces: Vec<NamespaceDiscovery>) {
        self.state.write().unwrap().namespaces = Some(namespaces);
    }

    fn namespace_details(&self, uid: &str) -> Option<NamespaceDetails> {
        self.state.read().unwrap().details.get(uid).cloned()
    }

    fn set_namespace_details(&self, details: NamespaceDetails) {
        let mut state = self.state.write().unwrap();
        state.details.insert(details.record.uid.clone(), details);
    }

    fn invalidate(&self) {
        let mut state = self.state.write().unwrap();
        trace!(details = state.details.len(), "Invalidating namespace cache.");

        state.namespaces = None;
        state.details.clear();
    }
}
