//! The store collaborator interface.

use crate::error::StoreResult;
use entimap_codec::{Row, Value};
use std::fmt;

/// A relational store that persists rows on behalf of a unit of work.
///
/// The unit of work only ever talks to the store through this trait. SQL
/// dialects, connection handling and schema management live behind it.
///
/// # Invariants
///
/// - Writes issued between `begin_transaction` and `commit` become visible
///   together or, after `rollback`, not at all
/// - `execute_insert` returns the column values the store produced itself
///   (generated keys, column defaults); columns the caller supplied are not
///   repeated
/// - `fetch_by_key` returns `Ok(None)` for a missing row; errors are reserved
///   for failures
pub trait Store: Send {
    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Fails if a transaction is already open or the backend refuses.
    fn begin_transaction(&mut self) -> StoreResult<()>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is open or the commit is rejected; the
    /// transaction is then rolled back.
    fn commit(&mut self) -> StoreResult<()>;

    /// Discards the open transaction.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is open.
    fn rollback(&mut self) -> StoreResult<()>;

    /// Returns true while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Inserts a row and returns the values the store generated for it.
    ///
    /// # Errors
    ///
    /// Fails on constraint violations or backend failures.
    fn execute_insert(&mut self, table: &str, values: &Row) -> StoreResult<Row>;

    /// Updates the given columns of the row with primary key `key`.
    ///
    /// # Errors
    ///
    /// Fails if the row does not exist, on constraint violations or backend
    /// failures.
    fn execute_update(&mut self, table: &str, key: &Value, changes: &Row) -> StoreResult<()>;

    /// Deletes the row with primary key `key`.
    ///
    /// # Errors
    ///
    /// Fails if the row does not exist, if other rows still reference it, or
    /// on backend failures.
    fn execute_delete(&mut self, table: &str, key: &Value) -> StoreResult<()>;

    /// Reads the row with primary key `key`.
    ///
    /// # Errors
    ///
    /// Fails on backend failures only.
    fn fetch_by_key(&mut self, table: &str, key: &Value) -> StoreResult<Option<Row>>;

    /// Reads every row whose `column` equals `value`, ordered by primary key.
    ///
    /// # Errors
    ///
    /// Fails if the table or column does not exist or on backend failures.
    fn fetch_by_column(&mut self, table: &str, column: &str, value: &Value)
        -> StoreResult<Vec<Row>>;
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn begin_transaction(&mut self) -> StoreResult<()> {
        (**self).begin_transaction()
    }

    fn commit(&mut self) -> StoreResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> StoreResult<()> {
        (**self).rollback()
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    fn execute_insert(&mut self, table: &str, values: &Row) -> StoreResult<Row> {
        (**self).execute_insert(table, values)
    }

    fn execute_update(&mut self, table: &str, key: &Value, changes: &Row) -> StoreResult<()> {
        (**self).execute_update(table, key, changes)
    }

    fn execute_delete(&mut self, table: &str, key: &Value) -> StoreResult<()> {
        (**self).execute_delete(table, key)
    }

    fn fetch_by_key(&mut self, table: &str, key: &Value) -> StoreResult<Option<Row>> {
        (**self).fetch_by_key(table, key)
    }

    fn fetch_by_column(
        &mut self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> StoreResult<Vec<Row>> {
        (**self).fetch_by_column(table, column, value)
    }
}

/// A statement as recorded in a store's statement log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `begin`
    Begin,
    /// `commit`
    Commit,
    /// `rollback`
    Rollback,
    /// `insert into ..`
    Insert {
        /// Table name.
        table: String,
        /// Supplied values.
        values: Row,
    },
    /// `update .. set .. where pk = key`
    Update {
        /// Table name.
        table: String,
        /// Primary key of the updated row.
        key: Value,
        /// Changed columns.
        changes: Row,
    },
    /// `delete from .. where pk = key`
    Delete {
        /// Table name.
        table: String,
        /// Primary key of the deleted row.
        key: Value,
    },
    /// `select * from .. where column = value`
    Select {
        /// Table name.
        table: String,
        /// Filter column.
        column: String,
        /// Filter value.
        value: Value,
    },
}

impl Statement {
    /// Returns true for inserts, updates and deletes.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. }
        )
    }

    /// Table touched by the statement, if any.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::Select { table, .. } => Some(table),
            _ => None,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Begin => write!(f, "begin"),
            Statement::Commit => write!(f, "commit"),
            Statement::Rollback => write!(f, "rollback"),
            Statement::Insert { table, values } => {
                let columns: Vec<_> = values.columns().map(|c| format!("`{c}`")).collect();
                let params: Vec<_> = values.iter().map(|(_, v)| v.to_string()).collect();
                write!(
                    f,
                    "insert into `{table}` ({}) values ({})",
                    columns.join(", "),
                    params.join(", ")
                )
            }
            Statement::Update {
                table,
                key,
                changes,
            } => {
                let sets: Vec<_> = changes.iter().map(|(c, v)| format!("`{c}` = {v}")).collect();
                write!(f, "update `{table}` set {} where pk = {key}", sets.join(", "))
            }
            Statement::Delete { table, key } => write!(f, "delete from `{table}` where pk = {key}"),
            Statement::Select {
                table,
                column,
                value,
            } => write!(f, "select * from `{table}` where `{column}` = {value}"),
        }
    }
}
