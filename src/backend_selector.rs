use crate::{
    backend::{EmbeddedBackend, GraphOps, SqliteBackend},
    capabilities::Capabilities,
    config::{BackendKind, GraphConfig},
    errors::GraphError,
    handle::GraphHandle,
    index_spec::IndexSpec,
    reconcile::{ReconcileReport, SchemaSnapshot},
    transaction::TxOutcome,
};

/// Instantiates whichever backend the configuration names.
pub fn instantiate<I, K, V>(pairs: I) -> Result<AnyGraph, GraphError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    AnyGraph::open(&GraphConfig::from_pairs(pairs))
}

/// A handle whose backend was picked at runtime.
pub enum AnyGraph {
    Embedded(GraphHandle<EmbeddedBackend>),
    Sqlite(GraphHandle<SqliteBackend>),
}

impl AnyGraph {
    pub fn open(config: &GraphConfig) -> Result<Self, GraphError> {
        match config.backend_kind()? {
            BackendKind::Embedded => Ok(AnyGraph::Embedded(GraphHandle::instantiate(config)?)),
            BackendKind::Sqlite => Ok(AnyGraph::Sqlite(GraphHandle::instantiate(config)?)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            AnyGraph::Embedded(_) => BackendKind::Embedded,
            AnyGraph::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            AnyGraph::Embedded(h) => h.capabilities(),
            AnyGraph::Sqlite(h) => h.capabilities(),
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            AnyGraph::Embedded(h) => h.is_active(),
            AnyGraph::Sqlite(h) => h.is_active(),
        }
    }

    pub fn begin(&self) -> Result<(), GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.begin(),
            AnyGraph::Sqlite(h) => h.begin(),
        }
    }

    pub fn commit(&self) -> Result<(), GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.commit(),
            AnyGraph::Sqlite(h) => h.commit(),
        }
    }

    pub fn rollback(&self) -> Result<(), GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.rollback(),
            AnyGraph::Sqlite(h) => h.rollback(),
        }
    }

    pub fn stop(&self, outcome: TxOutcome) -> Result<(), GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.stop(outcome),
            AnyGraph::Sqlite(h) => h.stop(outcome),
        }
    }

    pub fn with_transaction<R>(
        &self,
        work: impl FnOnce(&mut dyn GraphOps) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.with_transaction(|tx| work(tx)),
            AnyGraph::Sqlite(h) => h.with_transaction(|tx| work(tx)),
        }
    }

    pub fn transact<R>(
        &self,
        work: impl FnOnce(&mut dyn GraphOps) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.transact(|tx| work(tx)),
            AnyGraph::Sqlite(h) => h.transact(|tx| work(tx)),
        }
    }

    pub fn ensure_indices(&self, specs: &[IndexSpec]) -> Result<ReconcileReport, GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.ensure_indices(specs),
            AnyGraph::Sqlite(h) => h.ensure_indices(specs),
        }
    }

    pub fn schema_snapshot(&self) -> Result<Option<SchemaSnapshot>, GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.schema_snapshot(),
            AnyGraph::Sqlite(h) => h.schema_snapshot(),
        }
    }

    pub fn drain(&self) -> Result<(), GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.drain(),
            AnyGraph::Sqlite(h) => h.drain(),
        }
    }

    pub fn shutdown(&self) -> Result<(), GraphError> {
        match self {
            AnyGraph::Embedded(h) => h.shutdown(),
            AnyGraph::Sqlite(h) => h.shutdown(),
        }
    }
}
