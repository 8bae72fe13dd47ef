//! In-memory backend for local and demo use. No schema, no indices, no
//! isolation beyond "writes land on commit": concurrent commits are applied
//! in arrival order and the last writer wins.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    backend::{GraphBackend, NoSchema},
    capabilities::Capabilities,
    config::GraphConfig,
    errors::GraphError,
    staging::{CommittedStore, StagedTransaction, WriteSet, matches_filter},
    types::{ElementKind, ElementRef, GraphEdge, GraphNode, PropertyValue},
};

#[derive(Default)]
struct MemoryGraph {
    nodes: AHashMap<i64, GraphNode>,
    edges: AHashMap<i64, GraphEdge>,
}

pub struct MemoryStore {
    graph: RwLock<MemoryGraph>,
    next_id: AtomicI64,
    closed: AtomicBool,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            graph: RwLock::new(MemoryGraph::default()),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), GraphError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GraphError::unavailable("embedded backend has been shut down"));
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.read().edges.len()
    }
}

impl CommittedStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        EmbeddedBackend::NAME
    }

    fn allocate_id(&self) -> Result<i64, GraphError> {
        self.ensure_open()?;
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn load_node(&self, id: i64) -> Result<Option<GraphNode>, GraphError> {
        self.ensure_open()?;
        Ok(self.graph.read().nodes.get(&id).cloned())
    }

    fn load_edge(&self, id: i64) -> Result<Option<GraphEdge>, GraphError> {
        self.ensure_open()?;
        Ok(self.graph.read().edges.get(&id).cloned())
    }

    fn candidates(
        &self,
        kind: ElementKind,
        filter: &[(&str, PropertyValue)],
    ) -> Result<BTreeSet<i64>, GraphError> {
        self.ensure_open()?;
        let graph = self.graph.read();
        let ids = match kind {
            ElementKind::Node => graph
                .nodes
                .values()
                .filter(|n| matches_filter(&n.properties, filter))
                .map(|n| n.id)
                .collect(),
            ElementKind::Edge => graph
                .edges
                .values()
                .filter(|e| matches_filter(&e.properties, filter))
                .map(|e| e.id)
                .collect(),
        };
        Ok(ids)
    }

    fn apply(&self, writes: WriteSet) -> Result<(), GraphError> {
        self.ensure_open()?;
        let mut graph = self.graph.write();
        for element in writes.updates.keys() {
            let exists = match element {
                ElementRef::Node(id) => graph.nodes.contains_key(id),
                ElementRef::Edge(id) => graph.edges.contains_key(id),
            };
            if !exists {
                return Err(GraphError::not_found(element.to_string()));
            }
        }
        graph.nodes.extend(writes.nodes);
        graph.edges.extend(writes.edges);
        for (element, props) in writes.updates {
            let target = match element {
                ElementRef::Node(id) => graph.nodes.get_mut(&id).map(|n| &mut n.properties),
                ElementRef::Edge(id) => graph.edges.get_mut(&id).map(|e| &mut e.properties),
            };
            if let Some(target) = target {
                target.extend(props);
            }
        }
        Ok(())
    }
}

pub struct EmbeddedBackend {
    store: Arc<MemoryStore>,
}

impl EmbeddedBackend {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl GraphBackend for EmbeddedBackend {
    type Tx = StagedTransaction<MemoryStore>;
    type Schema = NoSchema;

    const NAME: &'static str = "embedded";

    fn open(config: &GraphConfig) -> Result<Self, GraphError> {
        config.log_unknown(&[]);
        Ok(Self::in_memory())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn begin_native(&self) -> Result<Self::Tx, GraphError> {
        self.store.ensure_open()?;
        Ok(StagedTransaction::new(Arc::clone(&self.store)))
    }

    fn schema(&self) -> Option<&Self::Schema> {
        None
    }

    fn shutdown(&self) -> Result<(), GraphError> {
        if !self.store.closed.swap(true, Ordering::AcqRel) {
            let mut graph = self.store.graph.write();
            graph.nodes.clear();
            graph.edges.clear();
        }
        Ok(())
    }
}
