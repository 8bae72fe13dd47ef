//! The adapter contract an application talks to.
//!
//! A [`GraphHandle`] owns one backend instance and layers the transaction
//! guard and the index reconciler on top of it. Both are implemented here
//! once, generically, so every backend behaves identically to callers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{info, warn};

use crate::{
    backend::{GraphBackend, NativeTransaction},
    capabilities::Capabilities,
    config::GraphConfig,
    errors::GraphError,
    index_spec::IndexSpec,
    reconcile::{self, ReconcileReport, SchemaSnapshot},
    transaction::{self, TxOutcome},
};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

pub struct GraphHandle<B: GraphBackend> {
    id: u64,
    backend: B,
    capabilities: Capabilities,
    closed: AtomicBool,
}

impl<B: GraphBackend> GraphHandle<B> {
    pub fn instantiate(config: &GraphConfig) -> Result<Self, GraphError> {
        let backend = B::open(config)?;
        Ok(Self::from_backend(backend))
    }

    pub fn from_backend(backend: B) -> Self {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        let capabilities = backend.capabilities();
        info!(handle = id, backend = B::NAME, ?capabilities, "graph handle ready");
        Self {
            id,
            backend,
            capabilities,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether the calling thread has a transaction open on this handle.
    pub fn is_active(&self) -> bool {
        transaction::is_active(self.id)
    }

    /// Opens a transaction for the calling thread. Fails with
    /// [`GraphError::NestedTransaction`] if this thread already has one open
    /// on this handle; other threads are unaffected.
    pub fn begin(&self) -> Result<(), GraphError> {
        self.ensure_open()?;
        transaction::begin(self.id, B::NAME, || self.backend.begin_native())
    }

    pub fn commit(&self) -> Result<(), GraphError> {
        let tx: B::Tx = transaction::finish(self.id, B::NAME)?;
        self.ensure_open()?;
        tx.commit()
    }

    pub fn rollback(&self) -> Result<(), GraphError> {
        let tx: B::Tx = transaction::finish(self.id, B::NAME)?;
        tx.rollback()
    }

    pub fn stop(&self, outcome: TxOutcome) -> Result<(), GraphError> {
        match outcome {
            TxOutcome::Committed => self.commit(),
            TxOutcome::Aborted => self.rollback(),
        }
    }

    /// Runs `work` against this thread's open transaction.
    pub fn with_transaction<R>(
        &self,
        work: impl FnOnce(&mut B::Tx) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        transaction::with_open(self.id, B::NAME, work)
    }

    /// Begins, runs `work`, then commits on `Ok` or rolls back on `Err`.
    pub fn transact<R>(
        &self,
        work: impl FnOnce(&mut B::Tx) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        self.begin()?;
        match self.with_transaction(work) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(backend = B::NAME, error = %rollback_err, "rollback after failed work also failed");
                }
                Err(err)
            }
        }
    }

    pub fn ensure_indices(&self, specs: &[IndexSpec]) -> Result<ReconcileReport, GraphError> {
        self.ensure_open()?;
        reconcile::ensure_indices(&self.backend, specs)
    }

    /// `None` when the backend keeps no schema.
    pub fn schema_snapshot(&self) -> Result<Option<SchemaSnapshot>, GraphError> {
        self.ensure_open()?;
        reconcile::read_snapshot(&self.backend)
    }

    pub fn drain(&self) -> Result<(), GraphError> {
        self.ensure_open()?;
        self.backend.drain()
    }

    /// Releases the backend. Safe to call more than once.
    pub fn shutdown(&self) -> Result<(), GraphError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        transaction::forget(self.id);
        info!(handle = self.id, backend = B::NAME, "shutting down graph handle");
        self.backend.shutdown()
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), GraphError> {
        if self.is_shutdown() {
            return Err(GraphError::unavailable(format!(
                "{} handle {} has been shut down",
                B::NAME,
                self.id
            )));
        }
        Ok(())
    }
}

/// Shuts the backend down even while other threads still hold open
/// transactions for this handle; those fail on commit.
impl<B: GraphBackend> Drop for GraphHandle<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(handle = self.id, backend = B::NAME, error = %err, "shutdown on drop failed");
        }
    }
}
