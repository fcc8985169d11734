//! Error types for store operations.

use entimap_codec::{CodecError, Value};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The table does not exist.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Table name.
        table: String,
    },

    /// A table with that name already exists.
    #[error("table already exists: {table}")]
    TableExists {
        /// Table name.
        table: String,
    },

    /// The column is not part of the table.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A row with the same primary key already exists.
    #[error("duplicate key {key} in table {table}")]
    DuplicateKey {
        /// Table name.
        table: String,
        /// Conflicting key.
        key: Value,
    },

    /// A NOT NULL column would hold NULL.
    #[error("column {table}.{column} may not be NULL")]
    NotNullViolation {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A foreign key points at a missing row, or a delete would orphan rows.
    #[error("foreign key violation on {table}.{column}: {message}")]
    ForeignKeyViolation {
        /// Table holding the foreign key.
        table: String,
        /// Foreign key column.
        column: String,
        /// What went wrong.
        message: String,
    },

    /// The row addressed by an update or delete does not exist.
    #[error("row {key} not found in table {table}")]
    RowNotFound {
        /// Table name.
        table: String,
        /// Requested key.
        key: Value,
    },

    /// The operation is not valid for the row or table.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Commit or rollback without an open transaction.
    #[error("no transaction is active")]
    NoTransaction,

    /// Begin while a transaction is already open.
    #[error("a transaction is already active")]
    TransactionActive,

    /// Committed state moved on since the transaction began.
    #[error("transaction conflict: committed version {current} does not match base {base}")]
    Conflict {
        /// Version the transaction started from.
        base: u64,
        /// Current committed version.
        current: u64,
    },

    /// A stored row could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Any other backend failure.
    #[error("backend failure: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a table not found error.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
