//! Per-context transaction bookkeeping.
//!
//! The calling context is the current thread. Each thread keeps its own map
//! from handle id to that handle's open native transaction, so the
//! "already active?" check never touches state shared with other threads and
//! unrelated contexts never contend on a guard lock.

use std::{any::Any, cell::RefCell};

use ahash::AHashMap;
use tracing::debug;

use crate::errors::GraphError;

/// Explicit end state for [`crate::handle::GraphHandle::stop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    Aborted,
}

enum Slot {
    Open(Box<dyn Any>),
    /// Checked out to a running `with_transaction` closure.
    Loaned,
}

thread_local! {
    static CONTEXT: RefCell<AHashMap<u64, Slot>> = RefCell::new(AHashMap::new());
}

pub(crate) fn is_active(handle: u64) -> bool {
    CONTEXT.with(|slots| slots.borrow().contains_key(&handle))
}

/// IDLE -> ACTIVE. The nested check runs before `open`, so a rejected call
/// never starts a native transaction.
pub(crate) fn begin<T: 'static>(
    handle: u64,
    backend: &str,
    open: impl FnOnce() -> Result<T, GraphError>,
) -> Result<(), GraphError> {
    if is_active(handle) {
        return Err(GraphError::nested(backend));
    }
    let tx = open()?;
    CONTEXT.with(|slots| slots.borrow_mut().insert(handle, Slot::Open(Box::new(tx))));
    debug!(handle, backend, "transaction started");
    Ok(())
}

/// ACTIVE -> IDLE, handing the native transaction back to the caller.
pub(crate) fn finish<T: 'static>(handle: u64, backend: &str) -> Result<T, GraphError> {
    let slot = CONTEXT.with(|slots| {
        let mut slots = slots.borrow_mut();
        match slots.remove(&handle) {
            Some(Slot::Loaned) => {
                slots.insert(handle, Slot::Loaned);
                Err(GraphError::in_use(backend))
            }
            Some(Slot::Open(tx)) => Ok(tx),
            None => Err(GraphError::no_active(backend)),
        }
    })?;
    debug!(handle, backend, "transaction finished");
    slot.downcast::<T>()
        .map(|tx| *tx)
        .map_err(|_| GraphError::invalid_input(format!("foreign transaction bound to {backend}")))
}

/// Runs `work` against the open transaction without leaving ACTIVE.
pub(crate) fn with_open<T: 'static, R>(
    handle: u64,
    backend: &str,
    work: impl FnOnce(&mut T) -> Result<R, GraphError>,
) -> Result<R, GraphError> {
    let tx = CONTEXT.with(|slots| {
        let mut slots = slots.borrow_mut();
        match slots.remove(&handle) {
            Some(Slot::Open(tx)) => {
                slots.insert(handle, Slot::Loaned);
                Ok(tx)
            }
            Some(Slot::Loaned) => {
                slots.insert(handle, Slot::Loaned);
                Err(GraphError::in_use(backend))
            }
            None => Err(GraphError::no_active(backend)),
        }
    })?;
    let mut loan = Loan {
        handle,
        tx: Some(tx),
    };
    match loan.tx.as_mut().and_then(|tx| (**tx).downcast_mut::<T>()) {
        Some(tx) => work(tx),
        None => Err(GraphError::invalid_input(format!(
            "foreign transaction bound to {backend}"
        ))),
    }
}

/// Drops whatever this thread still holds for `handle`.
pub(crate) fn forget(handle: u64) {
    let _ = CONTEXT.try_with(|slots| {
        if let Ok(mut slots) = slots.try_borrow_mut() {
            slots.remove(&handle);
        }
    });
}

/// Returns a loaned transaction to its slot, also when `work` unwinds.
struct Loan {
    handle: u64,
    tx: Option<Box<dyn Any>>,
}

impl Drop for Loan {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = CONTEXT.try_with(|slots| {
                slots.borrow_mut().insert(self.handle, Slot::Open(tx));
            });
        }
    }
}
