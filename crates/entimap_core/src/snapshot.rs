//! Immutable dirty-check baselines.

use crate::entity::Entity;
use entimap_codec::{Row, Value};
use std::sync::Arc;
use tracing::trace;

/// Column values of an entity as of its last load or flush.
///
/// Keyed by persisted column: scalar fields by name, owning relationships
/// by join column holding the foreign key scalar. Inverse relationships
/// are never part of a snapshot. A snapshot is never mutated; recapturing
/// replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(Arc<Row>);

impl Snapshot {
    /// Captures the current column values of `entity`.
    #[must_use]
    pub fn capture(entity: &Entity) -> Self {
        Self(Arc::new(entity.column_values()))
    }

    /// Wraps already materialized column values.
    #[must_use]
    pub fn from_row(row: Row) -> Self {
        Self(Arc::new(row))
    }

    /// Captured value of one column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// All captured columns.
    #[must_use]
    pub fn values(&self) -> &Row {
        &self.0
    }

    /// Columns of `entity` whose current value differs from this snapshot.
    #[must_use]
    pub fn diff(&self, entity: &Entity) -> Row {
        let changes = diff(&entity.column_values(), self);
        trace!(
            entity_type = entity.entity_type(),
            key = %entity.primary_key(),
            changed = changes.len(),
            "dirty check"
        );
        changes
    }
}

/// Columns of `current` whose value differs from `snapshot`.
///
/// Pure and total: a column absent from the snapshot counts as changed.
#[must_use]
pub fn diff(current: &Row, snapshot: &Snapshot) -> Row {
    current
        .iter()
        .filter(|(column, value)| snapshot.get(column) != Some(*value))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}
