//! Flush planning and execution.
//!
//! A flush runs in three phases:
//! 1. Plan: order inserts by foreign key dependencies, order deletes so
//!    referencing rows go first. Cycles are detected here, before any
//!    statement reaches the store.
//! 2. Execute: run every statement inside one store transaction guarded
//!    by [`TransactionGuard`].
//! 3. Apply: only after commit, hand generated values back to the caller
//!    (the unit of work updates states and snapshots).

use super::changeset::{ChangeKind, ChangeSet, Dependency};
use crate::error::{CoreError, CoreResult};
use crate::identity_map::IdentityMap;
use crate::types::{RecordId, UnitOfWorkId};
use entimap_codec::{Row, Value};
use entimap_store::{Store, StoreResult};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Statement counts of a committed flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Rows inserted.
    pub inserts: usize,
    /// Rows updated from change sets.
    pub updates: usize,
    /// Rows deleted.
    pub deletes: usize,
    /// Updates issued to fill foreign keys deferred to break a cycle.
    pub extra_updates: usize,
}

impl FlushReport {
    /// Total statements written.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.inserts + self.updates + self.deletes + self.extra_updates
    }

    /// Returns true if the flush wrote nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes() == 0
    }
}

/// Ordered statements of one flush.
#[derive(Debug, Default)]
pub(crate) struct FlushPlan {
    pub(crate) inserts: Vec<ChangeSet>,
    /// Foreign keys inserted as NULL and filled by an extra update.
    pub(crate) deferred: Vec<(RecordId, Dependency)>,
    pub(crate) updates: Vec<ChangeSet>,
    pub(crate) deletes: Vec<ChangeSet>,
}

impl FlushPlan {
    /// Orders change sets for execution.
    ///
    /// # Errors
    ///
    /// `UnresolvableDependency` if inserts form a cycle without a nullable
    /// foreign key to break it.
    pub(crate) fn build(change_sets: Vec<ChangeSet>, map: &IdentityMap) -> CoreResult<Self> {
        let mut creates = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for change_set in change_sets {
            match change_set.kind {
                ChangeKind::Create => creates.push(change_set),
                ChangeKind::Update => updates.push(change_set),
                ChangeKind::Delete => deletes.push(change_set),
            }
        }
        let (inserts, deferred) = order_inserts(creates)?;
        let deletes = order_deletes(deletes, map);
        Ok(Self {
            inserts,
            deferred,
            updates,
            deletes,
        })
    }

    fn is_deferred(&self, record: RecordId, column: &str) -> bool {
        self.deferred
            .iter()
            .any(|(r, d)| *r == record && d.column == column)
    }
}

/// Topologically sorts creates, keeping registration order among
/// independent rows.
fn order_inserts(
    creates: Vec<ChangeSet>,
) -> CoreResult<(Vec<ChangeSet>, Vec<(RecordId, Dependency)>)> {
    let position: HashMap<RecordId, usize> = creates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.record, i))
        .collect();
    // Edges to creates of this flush only; anything else is already stored.
    let mut edges: Vec<Vec<(usize, Dependency)>> = creates
        .iter()
        .map(|c| {
            c.dependencies
                .iter()
                .filter_map(|d| position.get(&d.target).map(|&t| (t, d.clone())))
                .collect()
        })
        .collect();

    let n = creates.len();
    let mut emitted = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut deferred = Vec::new();

    while order.len() < n {
        let ready = (0..n).find(|&i| !emitted[i] && edges[i].iter().all(|(t, _)| emitted[*t]));
        if let Some(i) = ready {
            emitted[i] = true;
            order.push(i);
            continue;
        }

        let breakable = (0..n).filter(|&i| !emitted[i]).find_map(|i| {
            edges[i].iter().position(|(t, d)| {
                d.nullable && !emitted[*t] && reaches(&edges, &emitted, *t, i)
            })
            .map(|j| (i, j))
        });
        match breakable {
            Some((i, j)) => {
                let (_, dependency) = edges[i].remove(j);
                debug!(
                    entity = %creates[i].label(),
                    column = %dependency.column,
                    "deferring foreign key to break insert cycle"
                );
                deferred.push((creates[i].record, dependency));
            }
            None => {
                let cycle = (0..n)
                    .filter(|&i| !emitted[i])
                    .map(|i| creates[i].label())
                    .collect();
                return Err(CoreError::UnresolvableDependency { cycle });
            }
        }
    }

    let mut slots: Vec<Option<ChangeSet>> = creates.into_iter().map(Some).collect();
    let inserts = order.into_iter().filter_map(|i| slots[i].take()).collect();
    Ok((inserts, deferred))
}

/// Returns true if `to` is reachable from `from` over unemitted nodes.
fn reaches(edges: &[Vec<(usize, Dependency)>], emitted: &[bool], from: usize, to: usize) -> bool {
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        stack.extend(
            edges[node]
                .iter()
                .map(|(t, _)| *t)
                .filter(|t| !emitted[*t]),
        );
    }
    false
}

/// Orders deletes so that a row goes before any row it references,
/// according to the foreign keys in the snapshots.
fn order_deletes(deletes: Vec<ChangeSet>, map: &IdentityMap) -> Vec<ChangeSet> {
    let position: HashMap<(String, Value), usize> = deletes
        .iter()
        .enumerate()
        .map(|(i, d)| ((d.entity_type().to_string(), d.key.clone()), i))
        .collect();
    // references[i] lists deletes that row i points at.
    let references: Vec<Vec<usize>> = deletes
        .iter()
        .map(|d| {
            let snapshot = map.get(d.record).and_then(|r| r.snapshot.clone());
            d.entity
                .descriptor()
                .owning_relationships()
                .filter_map(|relationship| {
                    let column = relationship.column()?;
                    let key = snapshot.as_ref()?.get(column)?.clone();
                    position.get(&(relationship.target.clone(), key)).copied()
                })
                .collect()
        })
        .collect();

    let n = deletes.len();
    let mut emitted = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let referenced = |j: usize| (0..n).any(|i| !emitted[i] && i != j && references[i].contains(&j));
        let next = (0..n)
            .find(|&j| !emitted[j] && !referenced(j))
            .or_else(|| (0..n).find(|&j| !emitted[j]));
        let Some(j) = next else { break };
        emitted[j] = true;
        order.push(j);
    }

    let mut slots: Vec<Option<ChangeSet>> = deletes.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Result of executing a plan, before it is applied to the unit of work.
#[derive(Debug, Default)]
pub(crate) struct FlushOutcome {
    pub(crate) report: FlushReport,
    /// Store-generated values per inserted record.
    pub(crate) generated: HashMap<RecordId, Row>,
}

/// Executes `plan` in one transaction.
///
/// Nothing outside the store is mutated; on error the transaction has
/// been rolled back.
pub(crate) fn execute<S: Store + ?Sized>(
    plan: &FlushPlan,
    store: &mut S,
    uow: UnitOfWorkId,
) -> CoreResult<FlushOutcome> {
    debug!(
        %uow,
        inserts = plan.inserts.len(),
        updates = plan.updates.len(),
        deletes = plan.deletes.len(),
        deferred = plan.deferred.len(),
        "flush started"
    );
    let mut guard = TransactionGuard::begin(store)?;
    let mut outcome = FlushOutcome::default();
    let mut keys: HashMap<RecordId, Value> = HashMap::new();

    for insert in &plan.inserts {
        let mut payload = insert.payload.clone();
        for dependency in &insert.dependencies {
            if plan.is_deferred(insert.record, &dependency.column) {
                payload.insert(dependency.column.clone(), Value::Null);
            } else if let Some(key) = keys.get(&dependency.target) {
                payload.insert(dependency.column.clone(), key.clone());
            }
        }
        let generated = guard.store().execute_insert(insert.entity_type(), &payload)?;
        let primary_key = &insert.entity.descriptor().primary_key;
        let key = generated
            .get(primary_key)
            .cloned()
            .unwrap_or_else(|| insert.key.clone());
        keys.insert(insert.record, key);
        outcome.generated.insert(insert.record, generated);
        outcome.report.inserts += 1;
    }

    for (record, dependency) in &plan.deferred {
        let Some(insert) = plan.inserts.iter().find(|c| c.record == *record) else {
            continue;
        };
        let target_key = keys.get(&dependency.target).cloned().unwrap_or_default();
        let own_key = keys.get(record).cloned().unwrap_or_default();
        let changes = Row::new().with(dependency.column.clone(), target_key);
        guard
            .store()
            .execute_update(insert.entity_type(), &own_key, &changes)?;
        outcome.report.extra_updates += 1;
    }

    for update in &plan.updates {
        let mut payload = update.payload.clone();
        for dependency in &update.dependencies {
            if let Some(key) = keys.get(&dependency.target) {
                payload.insert(dependency.column.clone(), key.clone());
            }
        }
        guard
            .store()
            .execute_update(update.entity_type(), &update.key, &payload)?;
        outcome.report.updates += 1;
    }

    for delete in &plan.deletes {
        guard
            .store()
            .execute_delete(delete.entity_type(), &delete.key)?;
        outcome.report.deletes += 1;
    }

    guard.commit()?;
    debug!(%uow, writes = outcome.report.writes(), "flush committed");
    Ok(outcome)
}

/// Store transaction that rolls back on drop unless committed.
pub(crate) struct TransactionGuard<'a, S: Store + ?Sized> {
    store: &'a mut S,
    finished: bool,
}

impl<'a, S: Store + ?Sized> TransactionGuard<'a, S> {
    /// Begins a transaction.
    pub(crate) fn begin(store: &'a mut S) -> StoreResult<Self> {
        store.begin_transaction()?;
        Ok(Self {
            store,
            finished: false,
        })
    }

    pub(crate) fn store(&mut self) -> &mut S {
        &mut *self.store
    }

    /// Commits; a failed commit still leaves no transaction open.
    pub(crate) fn commit(mut self) -> StoreResult<()> {
        self.finished = true;
        let result = self.store.commit();
        if result.is_err() && self.store.in_transaction() {
            if let Err(err) = self.store.rollback() {
                warn!(error = %err, "rollback after failed commit failed");
            }
        }
        result
    }
}

impl<S: Store + ?Sized> Drop for TransactionGuard<'_, S> {
    fn drop(&mut self) {
        if self.finished || !self.store.in_transaction() {
            return;
        }
        debug!("rolling back flush transaction");
        if let Err(err) = self.store.rollback() {
            warn!(error = %err, "rollback failed");
        }
    }
}
