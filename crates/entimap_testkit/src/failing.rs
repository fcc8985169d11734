//! Fault injection for store collaborators.

use entimap_codec::{Row, Value};
use entimap_store::{Store, StoreError, StoreResult};

/// Where a [`FailingStore`] injects its failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Never fail.
    Never,
    /// Fail the n-th write statement (1-based) seen by the wrapper.
    Write(usize),
    /// Fail every commit.
    Commit,
}

/// Wraps a store and fails at a chosen point.
///
/// Failed statements are not forwarded. A failed commit is forwarded as a
/// rollback so the inner store never keeps the transaction open.
#[derive(Debug)]
pub struct FailingStore<S> {
    inner: S,
    failure: FailurePoint,
    writes: usize,
}

impl<S: Store> FailingStore<S> {
    /// Wraps `inner`.
    pub fn new(inner: S, failure: FailurePoint) -> Self {
        Self {
            inner,
            failure,
            writes: 0,
        }
    }

    /// Changes the failure point and resets the write counter.
    pub fn fail_at(&mut self, failure: FailurePoint) {
        self.failure = failure;
        self.writes = 0;
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Write statements attempted since the last reset.
    pub fn writes_attempted(&self) -> usize {
        self.writes
    }

    fn check_write(&mut self) -> StoreResult<()> {
        self.writes += 1;
        match self.failure {
            FailurePoint::Write(n) if n == self.writes => Err(StoreError::backend(format!(
                "injected failure on write {n}"
            ))),
            _ => Ok(()),
        }
    }
}

impl<S: Store> Store for FailingStore<S> {
    fn begin_transaction(&mut self) -> StoreResult<()> {
        self.inner.begin_transaction()
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.failure == FailurePoint::Commit {
            self.inner.rollback()?;
            return Err(StoreError::backend("injected commit failure"));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    fn execute_insert(&mut self, table: &str, values: &Row) -> StoreResult<Row> {
        self.check_write()?;
        self.inner.execute_insert(table, values)
    }

    fn execute_update(&mut self, table: &str, key: &Value, changes: &Row) -> StoreResult<()> {
        self.check_write()?;
        self.inner.execute_update(table, key, changes)
    }

    fn execute_delete(&mut self, table: &str, key: &Value) -> StoreResult<()> {
        self.check_write()?;
        self.inner.execute_delete(table, key)
    }

    fn fetch_by_key(&mut self, table: &str, key: &Value) -> StoreResult<Option<Row>> {
        self.inner.fetch_by_key(table, key)
    }

    fn fetch_by_column(
        &mut self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> StoreResult<Vec<Row>> {
        self.inner.fetch_by_column(table, column, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entimap_store::{InMemoryStore, TableSchema};

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.create_table(TableSchema::new("t", "id")).unwrap();
        store
    }

    #[test]
    fn fails_on_chosen_write() {
        let mut failing = FailingStore::new(store(), FailurePoint::Write(2));
        failing.execute_insert("t", &Row::new().with("id", 1)).unwrap();
        let result = failing.execute_insert("t", &Row::new().with("id", 2));
        assert!(matches!(result, Err(StoreError::Backend { .. })));
        assert_eq!(failing.inner().row_count("t").unwrap(), 1);
    }

    #[test]
    fn failed_commit_leaves_no_transaction() {
        let mut failing = FailingStore::new(store(), FailurePoint::Commit);
        failing.begin_transaction().unwrap();
        failing.execute_insert("t", &Row::new().with("id", 1)).unwrap();
        assert!(failing.commit().is_err());
        assert!(!failing.in_transaction());
        assert_eq!(failing.inner().row_count("t").unwrap(), 0);
    }
}
