//! Backend-agnostic graph storage adapter.
//!
//! One contract, [`GraphHandle`], over interchangeable engines: an embedded
//! in-memory backend without schema and a schema-aware SQLite backend with
//! typed property keys and composite indices. The handle negotiates
//! [`Capabilities`], guards transactions per calling thread, and converges
//! the backend schema onto a list of [`IndexSpec`]s.

pub mod backend;
pub mod backend_selector;
pub mod cache;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod errors;
pub mod handle;
pub mod index_spec;
pub mod reconcile;
pub mod schema;
pub mod staging;
pub mod transaction;
pub mod types;

pub use crate::backend::{
    EmbeddedBackend, GraphBackend, GraphOps, NativeTransaction, SchemaManager,
    SchemaTransaction, SqliteBackend,
};
pub use crate::backend_selector::{AnyGraph, instantiate};
pub use crate::capabilities::Capabilities;
pub use crate::cli::CommandLineConfig;
pub use crate::config::{BackendKind, GraphConfig};
pub use crate::errors::GraphError;
pub use crate::handle::GraphHandle;
pub use crate::index_spec::IndexSpec;
pub use crate::reconcile::{ReconcileReport, SchemaSnapshot};
pub use crate::transaction::TxOutcome;
pub use crate::types::{
    EdgeSpec, ElementKind, ElementRef, GraphEdge, GraphNode, NodeSpec, Properties, PropertyValue,
    ValueType,
};
