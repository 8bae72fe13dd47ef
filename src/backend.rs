//! Backend contract bridging the adapter with concrete graph engines.
//!
//! A backend supplies three things: native transactions ([`NativeTransaction`],
//! which also carry the element API in [`GraphOps`]), an optional schema
//! manager ([`SchemaManager`]) and a [`Capabilities`] report. The transaction
//! guard and the index reconciler are written once against these traits; see
//! [`crate::handle::GraphHandle`] and [`crate::reconcile`].

mod embedded;
mod sqlite;

use std::collections::{BTreeMap, BTreeSet};

pub use embedded::{EmbeddedBackend, MemoryStore};
pub use sqlite::{SqlStore, SqliteBackend};

use crate::{
    capabilities::Capabilities,
    config::GraphConfig,
    errors::GraphError,
    types::{EdgeSpec, ElementKind, ElementRef, GraphEdge, GraphNode, NodeSpec, PropertyValue, ValueType},
};

/// Element operations available inside an open transaction.
pub trait GraphOps {
    fn insert_node(&mut self, node: NodeSpec) -> Result<i64, GraphError>;
    fn insert_edge(&mut self, edge: EdgeSpec) -> Result<i64, GraphError>;
    fn set_property(
        &mut self,
        element: ElementRef,
        key: &str,
        value: PropertyValue,
    ) -> Result<(), GraphError>;
    fn node(&self, id: i64) -> Result<Option<GraphNode>, GraphError>;
    fn edge(&self, id: i64) -> Result<Option<GraphEdge>, GraphError>;
    /// Ids of `kind` elements carrying every `(key, value)` pair, ascending.
    fn find(
        &self,
        kind: ElementKind,
        filter: &[(&str, PropertyValue)],
    ) -> Result<Vec<i64>, GraphError>;
}

/// A backend-level transaction. Dropping one without committing discards it.
pub trait NativeTransaction: GraphOps + Sized + 'static {
    fn commit(self) -> Result<(), GraphError>;
    fn rollback(self) -> Result<(), GraphError>;
}

/// Resolved handle to a typed property key, as returned by the schema primitives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyKey {
    pub name: String,
    pub value_type: ValueType,
}

/// Schema primitives available inside one schema-management transaction.
pub trait SchemaTransaction {
    fn index_names(&mut self) -> Result<BTreeSet<String>, GraphError>;
    /// Subset of [`SchemaTransaction::index_names`] declared unique.
    fn unique_index_names(&mut self) -> Result<BTreeSet<String>, GraphError>;
    fn property_keys(&mut self) -> Result<BTreeMap<String, ValueType>, GraphError>;
    fn property_key(&mut self, name: &str) -> Result<Option<PropertyKey>, GraphError>;
    fn create_property_key(
        &mut self,
        name: &str,
        value_type: ValueType,
    ) -> Result<PropertyKey, GraphError>;
    fn create_composite_index(
        &mut self,
        name: &str,
        kind: ElementKind,
        keys: &[PropertyKey],
        unique: bool,
    ) -> Result<(), GraphError>;
}

pub trait SchemaManager {
    /// Runs `work` inside one schema transaction. The transaction commits only
    /// when `work` returns `Ok`; any error leaves the schema untouched.
    fn schema_transaction<R>(
        &self,
        work: impl FnOnce(&mut dyn SchemaTransaction) -> Result<R, GraphError>,
    ) -> Result<R, GraphError>;
}

/// Schema type for backends without any schema support. Uninhabited, so
/// [`GraphBackend::schema`] can only ever return `None`.
#[derive(Debug)]
pub enum NoSchema {}

impl SchemaManager for NoSchema {
    fn schema_transaction<R>(
        &self,
        _work: impl FnOnce(&mut dyn SchemaTransaction) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        match *self {}
    }
}

pub trait GraphBackend: Send + Sync + Sized + 'static {
    type Tx: NativeTransaction;
    type Schema: SchemaManager;

    const NAME: &'static str;

    fn open(config: &GraphConfig) -> Result<Self, GraphError>;
    fn capabilities(&self) -> Capabilities;
    fn begin_native(&self) -> Result<Self::Tx, GraphError>;
    /// `None` for backends without schema or indexing.
    fn schema(&self) -> Option<&Self::Schema>;

    fn drain(&self) -> Result<(), GraphError> {
        Ok(())
    }

    fn shutdown(&self) -> Result<(), GraphError>;
}
