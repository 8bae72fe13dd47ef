//! Write staging shared by every backend.
//!
//! A [`StagedTransaction`] buffers writes in a [`WriteSet`] and reads through
//! it onto the committed state of a [`CommittedStore`]. Commit hands the whole
//! set to the store in one call; rollback drops it.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use tracing::debug;

use crate::{
    backend::{GraphOps, NativeTransaction},
    errors::GraphError,
    types::{
        EdgeSpec, ElementKind, ElementRef, GraphEdge, GraphNode, NodeSpec, Properties,
        PropertyValue, validate_key, validate_label,
    },
};

/// Committed state of one backend, as seen by staged transactions.
pub trait CommittedStore: Send + Sync + 'static {
    fn backend_name(&self) -> &'static str;
    fn allocate_id(&self) -> Result<i64, GraphError>;
    fn load_node(&self, id: i64) -> Result<Option<GraphNode>, GraphError>;
    fn load_edge(&self, id: i64) -> Result<Option<GraphEdge>, GraphError>;
    /// Committed ids of `kind` matching `filter`.
    fn candidates(
        &self,
        kind: ElementKind,
        filter: &[(&str, PropertyValue)],
    ) -> Result<BTreeSet<i64>, GraphError>;

    /// Early type check on staging. Commit re-checks inside `apply`.
    fn check_property(
        &self,
        _kind: ElementKind,
        _key: &str,
        _value: &PropertyValue,
    ) -> Result<(), GraphError> {
        Ok(())
    }

    /// Applies a write set atomically: either everything lands or nothing does.
    fn apply(&self, writes: WriteSet) -> Result<(), GraphError>;
}

#[derive(Debug, Default)]
pub struct WriteSet {
    pub nodes: BTreeMap<i64, GraphNode>,
    pub edges: BTreeMap<i64, GraphEdge>,
    /// Property writes against elements that were already committed.
    pub updates: BTreeMap<ElementRef, Properties>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.updates.is_empty()
    }

    /// Every element whose property set changes on commit.
    pub fn touched(&self) -> BTreeSet<ElementRef> {
        let mut touched: BTreeSet<ElementRef> = self.updates.keys().copied().collect();
        touched.extend(self.nodes.keys().map(|id| ElementRef::Node(*id)));
        touched.extend(self.edges.keys().map(|id| ElementRef::Edge(*id)));
        touched
    }

    /// Every `(key, value)` written, for commit-time type checks.
    pub fn written_properties(&self) -> Vec<(ElementKind, &str, &PropertyValue)> {
        let mut out = Vec::new();
        for node in self.nodes.values() {
            out.extend(
                node.properties
                    .iter()
                    .map(|(k, v)| (ElementKind::Node, k.as_str(), v)),
            );
        }
        for edge in self.edges.values() {
            out.extend(
                edge.properties
                    .iter()
                    .map(|(k, v)| (ElementKind::Edge, k.as_str(), v)),
            );
        }
        for (element, props) in &self.updates {
            out.extend(props.iter().map(|(k, v)| (element.kind(), k.as_str(), v)));
        }
        out
    }
}

pub struct StagedTransaction<S: CommittedStore> {
    store: Arc<S>,
    writes: WriteSet,
}

impl<S: CommittedStore> StagedTransaction<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            writes: WriteSet::default(),
        }
    }

    pub fn pending(&self) -> &WriteSet {
        &self.writes
    }

    fn check_properties(&self, kind: ElementKind, props: &Properties) -> Result<(), GraphError> {
        for (key, value) in props {
            validate_key(key)?;
            self.store.check_property(kind, key, value)?;
        }
        Ok(())
    }

    fn overlay(&self, element: ElementRef, props: &mut Properties) {
        if let Some(updates) = self.writes.updates.get(&element) {
            props.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    fn properties_of(&self, element: ElementRef) -> Result<Option<Properties>, GraphError> {
        Ok(match element {
            ElementRef::Node(id) => self.node(id)?.map(|n| n.properties),
            ElementRef::Edge(id) => self.edge(id)?.map(|e| e.properties),
        })
    }
}

impl<S: CommittedStore> GraphOps for StagedTransaction<S> {
    fn insert_node(&mut self, node: NodeSpec) -> Result<i64, GraphError> {
        validate_label(&node.label, "node")?;
        self.check_properties(ElementKind::Node, &node.properties)?;
        let id = self.store.allocate_id()?;
        self.writes.nodes.insert(
            id,
            GraphNode {
                id,
                label: node.label,
                properties: node.properties,
            },
        );
        Ok(id)
    }

    fn insert_edge(&mut self, edge: EdgeSpec) -> Result<i64, GraphError> {
        validate_label(&edge.label, "edge")?;
        if self.node(edge.from)?.is_none() || self.node(edge.to)?.is_none() {
            return Err(GraphError::invalid_input(
                "edge endpoints must reference existing nodes",
            ));
        }
        self.check_properties(ElementKind::Edge, &edge.properties)?;
        let id = self.store.allocate_id()?;
        self.writes.edges.insert(
            id,
            GraphEdge {
                id,
                from_id: edge.from,
                to_id: edge.to,
                label: edge.label,
                properties: edge.properties,
            },
        );
        Ok(id)
    }

    fn set_property(
        &mut self,
        element: ElementRef,
        key: &str,
        value: PropertyValue,
    ) -> Result<(), GraphError> {
        validate_key(key)?;
        self.store.check_property(element.kind(), key, &value)?;
        let staged = match element {
            ElementRef::Node(id) => self.writes.nodes.get_mut(&id).map(|n| &mut n.properties),
            ElementRef::Edge(id) => self.writes.edges.get_mut(&id).map(|e| &mut e.properties),
        };
        if let Some(props) = staged {
            props.insert(key.to_string(), value);
            return Ok(());
        }
        let exists = match element {
            ElementRef::Node(id) => self.store.load_node(id)?.is_some(),
            ElementRef::Edge(id) => self.store.load_edge(id)?.is_some(),
        };
        if !exists {
            return Err(GraphError::not_found(element.to_string()));
        }
        self.writes
            .updates
            .entry(element)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn node(&self, id: i64) -> Result<Option<GraphNode>, GraphError> {
        if let Some(node) = self.writes.nodes.get(&id) {
            return Ok(Some(node.clone()));
        }
        let mut node = self.store.load_node(id)?;
        if let Some(node) = node.as_mut() {
            self.overlay(ElementRef::Node(id), &mut node.properties);
        }
        Ok(node)
    }

    fn edge(&self, id: i64) -> Result<Option<GraphEdge>, GraphError> {
        if let Some(edge) = self.writes.edges.get(&id) {
            return Ok(Some(edge.clone()));
        }
        let mut edge = self.store.load_edge(id)?;
        if let Some(edge) = edge.as_mut() {
            self.overlay(ElementRef::Edge(id), &mut edge.properties);
        }
        Ok(edge)
    }

    fn find(
        &self,
        kind: ElementKind,
        filter: &[(&str, PropertyValue)],
    ) -> Result<Vec<i64>, GraphError> {
        // Staged updates can make a committed element match or stop matching,
        // so every candidate is re-evaluated against its overlaid properties.
        let mut candidates = self.store.candidates(kind, filter)?;
        candidates.extend(
            self.writes
                .updates
                .keys()
                .filter(|element| element.kind() == kind)
                .map(|element| element.id()),
        );
        match kind {
            ElementKind::Node => candidates.extend(self.writes.nodes.keys().copied()),
            ElementKind::Edge => candidates.extend(self.writes.edges.keys().copied()),
        }
        let mut ids = Vec::new();
        for id in candidates {
            let element = match kind {
                ElementKind::Node => ElementRef::Node(id),
                ElementKind::Edge => ElementRef::Edge(id),
            };
            if let Some(props) = self.properties_of(element)? {
                if matches_filter(&props, filter) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

impl<S: CommittedStore> NativeTransaction for StagedTransaction<S> {
    fn commit(self) -> Result<(), GraphError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        debug!(
            backend = self.store.backend_name(),
            nodes = self.writes.nodes.len(),
            edges = self.writes.edges.len(),
            updates = self.writes.updates.len(),
            "applying staged writes"
        );
        self.store.apply(self.writes)
    }

    fn rollback(self) -> Result<(), GraphError> {
        Ok(())
    }
}

pub fn matches_filter(props: &Properties, filter: &[(&str, PropertyValue)]) -> bool {
    filter
        .iter()
        .all(|(key, value)| props.get(*key) == Some(value))
}
