//! In-memory relational store.

use crate::error::{StoreError, StoreResult};
use crate::schema::{KeyGeneration, TableSchema};
use crate::store::{Statement, Store};
use entimap_codec::{decode_row, encode_row, Row, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::trace;

/// A transactional in-memory store.
///
/// This store is suitable for:
/// - Unit and integration tests of the unit of work
/// - Ephemeral sessions that don't need persistence
///
/// Committed rows are kept as canonical CBOR bytes, so nothing handed out by
/// the store aliases committed state. Every statement is appended to a
/// statement log that tests can inspect.
///
/// # Sharing
///
/// Cloning produces another handle onto the same committed data with its
/// own transaction state, the way two connections share one database. A
/// transaction works on a private copy of the tables; commit publishes it
/// only if no other handle committed in between, otherwise it fails with
/// [`StoreError::Conflict`].
///
/// # Example
///
/// ```rust
/// use entimap_codec::{Row, Value};
/// use entimap_store::{InMemoryStore, Store, TableSchema};
///
/// let mut store = InMemoryStore::new();
/// store.create_table(TableSchema::new("user", "id")).unwrap();
/// store.execute_insert("user", &Row::new().with("id", 1)).unwrap();
/// assert!(store.fetch_by_key("user", &Value::Integer(1)).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    shared: Arc<RwLock<Committed>>,
    txn: Option<Pending>,
}

#[derive(Debug, Default)]
struct Committed {
    version: u64,
    tables: BTreeMap<String, Table>,
    log: Vec<Statement>,
}

#[derive(Debug)]
struct Pending {
    base_version: u64,
    tables: BTreeMap<String, Table>,
    dirty: bool,
}

#[derive(Debug, Clone)]
struct Table {
    schema: Arc<TableSchema>,
    rows: HashMap<Value, Arc<[u8]>>,
    next_id: i64,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema: Arc::new(schema),
            rows: HashMap::new(),
            next_id: 1,
        }
    }

    fn row(&self, key: &Value) -> StoreResult<Option<Row>> {
        self.rows
            .get(key)
            .map(|bytes| decode_row(bytes).map_err(StoreError::from))
            .transpose()
    }

    fn rows_sorted(&self) -> StoreResult<Vec<(Value, Row)>> {
        let mut rows = self
            .rows
            .iter()
            .map(|(key, bytes)| Ok((key.clone(), decode_row(bytes)?)))
            .collect::<StoreResult<Vec<_>>>()?;
        rows.sort_by(|a, b| a.0.cmp_total(&b.0));
        Ok(rows)
    }
}

impl Clone for InMemoryStore {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            txn: None,
        }
    }
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Fails if a table with the same name exists.
    pub fn create_table(&self, schema: TableSchema) -> StoreResult<()> {
        let mut shared = self.shared.write();
        if shared.tables.contains_key(&schema.name) {
            return Err(StoreError::TableExists { table: schema.name });
        }
        shared.tables.insert(schema.name.clone(), Table::new(schema));
        shared.version += 1;
        Ok(())
    }

    /// Creates several tables.
    ///
    /// # Errors
    ///
    /// Stops at the first table that already exists.
    pub fn create_tables(&self, schemas: impl IntoIterator<Item = TableSchema>) -> StoreResult<()> {
        schemas.into_iter().try_for_each(|schema| self.create_table(schema))
    }

    /// Returns a copy of the statement log.
    #[must_use]
    pub fn statements(&self) -> Vec<Statement> {
        self.shared.read().log.clone()
    }

    /// Returns the logged inserts, updates and deletes.
    #[must_use]
    pub fn writes(&self) -> Vec<Statement> {
        self.shared
            .read()
            .log
            .iter()
            .filter(|s| s.is_write())
            .cloned()
            .collect()
    }

    /// Empties the statement log.
    pub fn clear_statements(&self) {
        self.shared.write().log.clear();
    }

    /// Reads a committed row without logging a statement.
    ///
    /// # Errors
    ///
    /// Fails if the table does not exist.
    pub fn peek(&self, table: &str, key: &Value) -> StoreResult<Option<Row>> {
        let shared = self.shared.read();
        lookup(&shared.tables, table)?.row(key)
    }

    /// Number of committed rows in a table.
    ///
    /// # Errors
    ///
    /// Fails if the table does not exist.
    pub fn row_count(&self, table: &str) -> StoreResult<usize> {
        let shared = self.shared.read();
        Ok(lookup(&shared.tables, table)?.rows.len())
    }

    fn record(&self, statement: Statement) {
        trace!(%statement, "store statement");
        self.shared.write().log.push(statement);
    }

    /// Runs `f` against the transaction's tables, or against committed
    /// tables as a single-statement transaction when none is open.
    fn write<R>(
        &mut self,
        f: impl FnOnce(&mut BTreeMap<String, Table>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        match self.txn.as_mut() {
            Some(pending) => {
                let result = f(&mut pending.tables)?;
                pending.dirty = true;
                Ok(result)
            }
            None => {
                let mut shared = self.shared.write();
                let result = f(&mut shared.tables)?;
                shared.version += 1;
                Ok(result)
            }
        }
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<String, Table>) -> StoreResult<R>) -> StoreResult<R> {
        match self.txn.as_ref() {
            Some(pending) => f(&pending.tables),
            None => f(&self.shared.read().tables),
        }
    }
}

fn lookup<'a>(tables: &'a BTreeMap<String, Table>, table: &str) -> StoreResult<&'a Table> {
    tables
        .get(table)
        .ok_or_else(|| StoreError::table_not_found(table))
}

fn check_columns(schema: &TableSchema, row: &Row) -> StoreResult<()> {
    match row.columns().find(|c| schema.get_column(c).is_none()) {
        Some(column) => Err(StoreError::UnknownColumn {
            table: schema.name.clone(),
            column: column.to_string(),
        }),
        None => Ok(()),
    }
}

/// Checks NOT NULL and foreign key constraints of a complete row.
fn check_constraints(
    tables: &BTreeMap<String, Table>,
    schema: &TableSchema,
    row: &Row,
) -> StoreResult<()> {
    for column in &schema.columns {
        let value = row.get(&column.name).unwrap_or(&Value::Null);
        if value.is_null() {
            if !column.nullable {
                return Err(StoreError::NotNullViolation {
                    table: schema.name.clone(),
                    column: column.name.clone(),
                });
            }
            continue;
        }
        if let Some(target) = &column.references {
            let target_table = tables.get(target).ok_or_else(|| StoreError::ForeignKeyViolation {
                table: schema.name.clone(),
                column: column.name.clone(),
                message: format!("referenced table {target} does not exist"),
            })?;
            if !target_table.rows.contains_key(value) {
                return Err(StoreError::ForeignKeyViolation {
                    table: schema.name.clone(),
                    column: column.name.clone(),
                    message: format!("no row {value} in {target}"),
                });
            }
        }
    }
    Ok(())
}

fn insert_row(tables: &mut BTreeMap<String, Table>, table: &str, values: &Row) -> StoreResult<Row> {
    let t = lookup(tables, table)?;
    let schema = Arc::clone(&t.schema);
    check_columns(&schema, values)?;

    let mut row = values.clone();
    let mut generated = Row::new();
    let key = match row.get(&schema.primary_key) {
        Some(key) if !key.is_null() => key.clone(),
        _ => match schema.key_generation {
            KeyGeneration::AutoIncrement => {
                let key = Value::Integer(t.next_id);
                row.insert(schema.primary_key.clone(), key.clone());
                generated.insert(schema.primary_key.clone(), key.clone());
                key
            }
            KeyGeneration::Assigned => {
                return Err(StoreError::NotNullViolation {
                    table: schema.name.clone(),
                    column: schema.primary_key.clone(),
                })
            }
        },
    };
    for column in &schema.columns {
        if !row.contains(&column.name) {
            if let Some(default) = &column.default {
                generated.insert(column.name.clone(), default.clone());
            }
            row.insert(column.name.clone(), column.default.clone().unwrap_or(Value::Null));
        }
    }

    if t.rows.contains_key(&key) {
        return Err(StoreError::DuplicateKey {
            table: table.to_string(),
            key,
        });
    }
    check_constraints(tables, &schema, &row)?;

    let t = tables
        .get_mut(table)
        .ok_or_else(|| StoreError::table_not_found(table))?;
    if let Value::Integer(n) = key {
        t.next_id = t.next_id.max(n.saturating_add(1));
    }
    t.rows.insert(key, encode_row(&row).into());
    Ok(generated)
}

fn update_row(
    tables: &mut BTreeMap<String, Table>,
    table: &str,
    key: &Value,
    changes: &Row,
) -> StoreResult<()> {
    let t = lookup(tables, table)?;
    let schema = Arc::clone(&t.schema);
    check_columns(&schema, changes)?;
    if changes
        .get(&schema.primary_key)
        .is_some_and(|new_key| new_key != key)
    {
        return Err(StoreError::invalid_operation(format!(
            "primary key of {table} row {key} cannot change"
        )));
    }
    let mut row = t.row(key)?.ok_or_else(|| StoreError::RowNotFound {
        table: table.to_string(),
        key: key.clone(),
    })?;
    row.merge(changes);
    check_constraints(tables, &schema, &row)?;

    let t = tables
        .get_mut(table)
        .ok_or_else(|| StoreError::table_not_found(table))?;
    t.rows.insert(key.clone(), encode_row(&row).into());
    Ok(())
}

fn delete_row(tables: &mut BTreeMap<String, Table>, table: &str, key: &Value) -> StoreResult<()> {
    if !lookup(tables, table)?.rows.contains_key(key) {
        return Err(StoreError::RowNotFound {
            table: table.to_string(),
            key: key.clone(),
        });
    }

    for (name, other) in tables.iter() {
        for (column, target) in other.schema.foreign_keys() {
            if target != table {
                continue;
            }
            for (other_key, row) in other.rows_sorted()? {
                let is_self = name == table && &other_key == key;
                if !is_self && row.get(&column.name) == Some(key) {
                    return Err(StoreError::ForeignKeyViolation {
                        table: name.clone(),
                        column: column.name.clone(),
                        message: format!("row {other_key} still references {table} {key}"),
                    });
                }
            }
        }
    }

    if let Some(t) = tables.get_mut(table) {
        t.rows.remove(key);
    }
    Ok(())
}

impl Store for InMemoryStore {
    fn begin_transaction(&mut self) -> StoreResult<()> {
        if self.txn.is_some() {
            return Err(StoreError::TransactionActive);
        }
        let (base_version, tables) = {
            let shared = self.shared.read();
            (shared.version, shared.tables.clone())
        };
        self.txn = Some(Pending {
            base_version,
            tables,
            dirty: false,
        });
        self.record(Statement::Begin);
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        let pending = self.txn.take().ok_or(StoreError::NoTransaction)?;
        {
            let mut shared = self.shared.write();
            if pending.dirty {
                if shared.version != pending.base_version {
                    let current = shared.version;
                    shared.log.push(Statement::Rollback);
                    return Err(StoreError::Conflict {
                        base: pending.base_version,
                        current,
                    });
                }
                shared.tables = pending.tables;
                shared.version += 1;
            }
        }
        self.record(Statement::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.txn.take().ok_or(StoreError::NoTransaction)?;
        self.record(Statement::Rollback);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn execute_insert(&mut self, table: &str, values: &Row) -> StoreResult<Row> {
        self.record(Statement::Insert {
            table: table.to_string(),
            values: values.clone(),
        });
        self.write(|tables| insert_row(tables, table, values))
    }

    fn execute_update(&mut self, table: &str, key: &Value, changes: &Row) -> StoreResult<()> {
        self.record(Statement::Update {
            table: table.to_string(),
            key: key.clone(),
            changes: changes.clone(),
        });
        self.write(|tables| update_row(tables, table, key, changes))
    }

    fn execute_delete(&mut self, table: &str, key: &Value) -> StoreResult<()> {
        self.record(Statement::Delete {
            table: table.to_string(),
            key: key.clone(),
        });
        self.write(|tables| delete_row(tables, table, key))
    }

    fn fetch_by_key(&mut self, table: &str, key: &Value) -> StoreResult<Option<Row>> {
        let column = self.read(|tables| Ok(lookup(tables, table)?.schema.primary_key.clone()))?;
        self.record(Statement::Select {
            table: table.to_string(),
            column,
            value: key.clone(),
        });
        self.read(|tables| lookup(tables, table)?.row(key))
    }

    fn fetch_by_column(
        &mut self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> StoreResult<Vec<Row>> {
        self.record(Statement::Select {
            table: table.to_string(),
            column: column.to_string(),
            value: value.clone(),
        });
        self.read(|tables| {
            let t = lookup(tables, table)?;
            if t.schema.get_column(column).is_none() {
                return Err(StoreError::UnknownColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
            Ok(t.rows_sorted()?
                .into_iter()
                .map(|(_, row)| row)
                .filter(|row| row.get(column) == Some(value))
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_table(
                TableSchema::new("user", "id")
                    .key_generation(KeyGeneration::AutoIncrement)
                    .column(ColumnSchema::new("name").default_value("Default"))
                    .column(ColumnSchema::new("balance").default_value(0)),
            )
            .unwrap();
        store
            .create_table(
                TableSchema::new("blog", "id")
                    .column(ColumnSchema::new("title").nullable(true))
                    .column(ColumnSchema::new("author_id").references("user")),
            )
            .unwrap();
        store
    }

    #[test]
    fn insert_returns_generated_values_only() {
        let mut store = store();
        let generated = store
            .execute_insert("user", &Row::new().with("name", "Some User"))
            .unwrap();
        assert_eq!(generated, Row::new().with("id", 1).with("balance", 0));

        let row = store.peek("user", &Value::Integer(1)).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("Some User")));
    }

    #[test]
    fn explicit_keys_advance_the_sequence() {
        let mut store = store();
        store.execute_insert("user", &Row::new().with("id", 7)).unwrap();
        let generated = store.execute_insert("user", &Row::new()).unwrap();
        assert_eq!(generated.get("id"), Some(&Value::Integer(8)));
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut store = store();
        store.execute_insert("user", &Row::new().with("id", 1)).unwrap();
        let result = store.execute_insert("user", &Row::new().with("id", 1));
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
    }

    #[test]
    fn foreign_key_must_exist() {
        let mut store = store();
        let result = store.execute_insert("blog", &Row::new().with("id", 1).with("author_id", 9));
        assert!(matches!(result, Err(StoreError::ForeignKeyViolation { .. })));
    }

    #[test]
    fn not_null_enforced() {
        let mut store = store();
        let result = store.execute_insert("blog", &Row::new().with("id", 1));
        assert!(matches!(
            result,
            Err(StoreError::NotNullViolation { ref column, .. }) if column == "author_id"
        ));
    }

    #[test]
    fn unknown_column_rejected() {
        let mut store = store();
        let result = store.execute_insert("user", &Row::new().with("nickname", "x"));
        assert!(matches!(result, Err(StoreError::UnknownColumn { .. })));
    }

    #[test]
    fn delete_of_referenced_row_rejected() {
        let mut store = store();
        store.execute_insert("user", &Row::new().with("id", 1)).unwrap();
        store
            .execute_insert("blog", &Row::new().with("id", 1).with("author_id", 1))
            .unwrap();
        let result = store.execute_delete("user", &Value::Integer(1));
        assert!(matches!(result, Err(StoreError::ForeignKeyViolation { .. })));

        store.execute_delete("blog", &Value::Integer(1)).unwrap();
        store.execute_delete("user", &Value::Integer(1)).unwrap();
        assert_eq!(store.row_count("user").unwrap(), 0);
    }

    #[test]
    fn update_merges_columns() {
        let mut store = store();
        store
            .execute_insert("user", &Row::new().with("id", 1).with("name", "a"))
            .unwrap();
        store
            .execute_update("user", &Value::Integer(1), &Row::new().with("balance", 10))
            .unwrap();
        let row = store.peek("user", &Value::Integer(1)).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("a")));
        assert_eq!(row.get("balance"), Some(&Value::Integer(10)));
    }

    #[test]
    fn update_cannot_change_key() {
        let mut store = store();
        store.execute_insert("user", &Row::new().with("id", 1)).unwrap();
        let result =
            store.execute_update("user", &Value::Integer(1), &Row::new().with("id", 2));
        assert!(matches!(result, Err(StoreError::InvalidOperation { .. })));
    }

    #[test]
    fn rollback_discards_writes() {
        let mut store = store();
        store.begin_transaction().unwrap();
        store.execute_insert("user", &Row::new().with("id", 1)).unwrap();
        assert!(store.fetch_by_key("user", &Value::Integer(1)).unwrap().is_some());
        store.rollback().unwrap();

        assert!(store.peek("user", &Value::Integer(1)).unwrap().is_none());
        assert!(!store.in_transaction());
    }

    #[test]
    fn uncommitted_writes_invisible_to_other_handles() {
        let mut store = store();
        let observer = store.clone();
        store.begin_transaction().unwrap();
        store.execute_insert("user", &Row::new().with("id", 1)).unwrap();
        assert_eq!(observer.row_count("user").unwrap(), 0);
        store.commit().unwrap();
        assert_eq!(observer.row_count("user").unwrap(), 1);
    }

    #[test]
    fn concurrent_commit_conflicts() {
        let mut first = store();
        let mut second = first.clone();
        first.begin_transaction().unwrap();
        second.begin_transaction().unwrap();
        first.execute_insert("user", &Row::new().with("id", 1)).unwrap();
        second.execute_insert("user", &Row::new().with("id", 2)).unwrap();
        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(StoreError::Conflict { .. })));
        assert_eq!(first.row_count("user").unwrap(), 1);
    }

    #[test]
    fn transaction_state_errors() {
        let mut store = store();
        assert!(matches!(store.commit(), Err(StoreError::NoTransaction)));
        assert!(matches!(store.rollback(), Err(StoreError::NoTransaction)));
        store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction(),
            Err(StoreError::TransactionActive)
        ));
    }

    #[test]
    fn fetch_by_column_orders_by_key() {
        let mut store = store();
        store.execute_insert("user", &Row::new().with("id", 1)).unwrap();
        store.execute_insert("user", &Row::new().with("id", 2)).unwrap();
        for id in [3, 1, 2] {
            let author = if id == 2 { 2 } else { 1 };
            store
                .execute_insert("blog", &Row::new().with("id", id).with("author_id", author))
                .unwrap();
        }
        let rows = store
            .fetch_by_column("blog", "author_id", &Value::Integer(1))
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get("id").cloned().unwrap()).collect();
        assert_eq!(ids, vec![Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn statement_log_records_everything() {
        let mut store = store();
        store.begin_transaction().unwrap();
        store.execute_insert("user", &Row::new().with("id", 1)).unwrap();
        store.commit().unwrap();
        store.fetch_by_key("user", &Value::Integer(1)).unwrap();

        let log = store.statements();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], Statement::Begin);
        assert!(log[1].is_write());
        assert_eq!(log[2], Statement::Commit);
        assert!(matches!(log[3], Statement::Select { .. }));
        assert_eq!(store.writes().len(), 1);

        store.clear_statements();
        assert!(store.statements().is_empty());
    }

    #[test]
    fn create_existing_table_fails() {
        let store = store();
        let result = store.create_table(TableSchema::new("user", "id"));
        assert!(matches!(result, Err(StoreError::TableExists { .. })));
    }

    proptest::proptest! {
        #[test]
        fn generated_key_exceeds_every_explicit_key(keys in proptest::collection::btree_set(1i64..1000, 0..20)) {
            let mut store = store();
            for key in &keys {
                store.execute_insert("user", &Row::new().with("id", *key)).unwrap();
            }
            let generated = store.execute_insert("user", &Row::new()).unwrap();
            let id = generated.get("id").and_then(Value::as_integer).unwrap();
            proptest::prop_assert!(keys.iter().all(|k| *k < id));
            proptest::prop_assert_eq!(store.row_count("user").unwrap(), keys.len() + 1);
        }
    }
}
