use thiserror::Error;

use crate::types::ValueType;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("nested transaction: {0} already has an active transaction in this context")]
    NestedTransaction(String),
    #[error("no active transaction on {0} in this context")]
    NoActiveTransaction(String),
    #[error("transaction on {0} is held by an enclosing with_transaction call")]
    TransactionInUse(String),
    #[error("schema conflict: property `{property}` requested as {expected} but declared as {actual}")]
    SchemaConflict {
        property: String,
        expected: ValueType,
        actual: ValueType,
    },
    #[error("property `{property}` is declared as {expected}, got {actual}")]
    PropertyType {
        property: String,
        expected: ValueType,
        actual: ValueType,
    },
    #[error("unique index `{index}` already holds {entry}")]
    UniqueViolation { index: String, entry: String },
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("query error: {0}")]
    QueryError(String),
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GraphError {
    pub fn nested<T: Into<String>>(backend: T) -> Self {
        GraphError::NestedTransaction(backend.into())
    }

    pub fn no_active<T: Into<String>>(backend: T) -> Self {
        GraphError::NoActiveTransaction(backend.into())
    }

    pub fn in_use<T: Into<String>>(backend: T) -> Self {
        GraphError::TransactionInUse(backend.into())
    }

    pub fn unavailable<T: Into<String>>(msg: T) -> Self {
        GraphError::BackendUnavailable(msg.into())
    }

    pub fn query<T: Into<String>>(msg: T) -> Self {
        GraphError::QueryError(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        GraphError::NotFound(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        GraphError::InvalidInput(msg.into())
    }

    /// Programmer errors in transaction bracketing. These fail the operation
    /// that triggered them and are never retried.
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            GraphError::NestedTransaction(_)
                | GraphError::NoActiveTransaction(_)
                | GraphError::TransactionInUse(_)
        )
    }

    /// Prefixes message-carrying errors with what was being processed.
    /// Structured variants already name their subject and pass through.
    pub fn context<T: AsRef<str>>(self, ctx: T) -> Self {
        let ctx = ctx.as_ref();
        match self {
            GraphError::BackendUnavailable(msg) => {
                GraphError::BackendUnavailable(format!("{ctx}: {msg}"))
            }
            GraphError::QueryError(msg) => GraphError::QueryError(format!("{ctx}: {msg}")),
            GraphError::InvalidInput(msg) => GraphError::InvalidInput(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}
