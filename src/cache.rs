use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::types::ElementKind;

/// A composite index definition as stored in the catalog. `keys` are sorted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub keys: Vec<String>,
    pub unique: bool,
}

/// Catalog lookups per element kind, cleared whenever the schema changes.
#[derive(Default)]
pub struct IndexCache {
    inner: RwLock<AHashMap<ElementKind, Arc<Vec<IndexDef>>>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AHashMap::new()),
        }
    }

    pub fn get(&self, kind: ElementKind) -> Option<Arc<Vec<IndexDef>>> {
        self.inner.read().get(&kind).cloned()
    }

    pub fn insert(&self, kind: ElementKind, value: Arc<Vec<IndexDef>>) {
        self.inner.write().insert(kind, value);
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}
