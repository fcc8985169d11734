//! The unit of work.
//!
//! Owns the identity map and snapshots of one session, computes change
//! sets and flushes them:
//! - **Identity**: one tracked instance per row
//! - **Dirty checking**: a pure diff of current values against snapshots
//! - **Atomic flush**: all statements commit together or not at all, and
//!   tracking state changes only after commit

mod changeset;
mod flush;

pub use changeset::{compute_change_sets, ChangeKind, ChangeSet};

use changeset::managed_changes;
pub use flush::FlushReport;

use crate::config::Config;
use crate::entity::{Entity, Reference};
use crate::error::{CoreError, CoreResult};
use crate::identity_map::{IdentityMap, ManagedRecord};
use crate::snapshot::Snapshot;
use crate::types::{EntityState, RecordId, UnitOfWorkId};
use entimap_codec::Row;
use entimap_store::Store;
use flush::{FlushOutcome, FlushPlan};
use tracing::{debug, trace};

/// Tracking state of one session.
#[derive(Debug)]
pub struct UnitOfWork {
    id: UnitOfWorkId,
    map: IdentityMap,
    config: Config,
}

impl UnitOfWork {
    /// Creates an empty unit of work.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            id: UnitOfWorkId::new(),
            map: IdentityMap::new(),
            config,
        }
    }

    /// Identifier used in log events.
    #[must_use]
    pub fn id(&self) -> UnitOfWorkId {
        self.id
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The identity map.
    #[must_use]
    pub fn identity_map(&self) -> &IdentityMap {
        &self.map
    }

    pub(crate) fn identity_map_mut(&mut self) -> &mut IdentityMap {
        &mut self.map
    }

    /// Lifecycle state of `entity` in this unit of work.
    #[must_use]
    pub fn state_of(&self, entity: &Entity) -> EntityState {
        self.record(entity)
            .map_or(EntityState::Detached, ManagedRecord::state)
    }

    /// Snapshot of a tracked entity.
    #[must_use]
    pub fn snapshot_of(&self, entity: &Entity) -> Option<Snapshot> {
        self.record(entity).and_then(|r| r.snapshot.clone())
    }

    fn record(&self, entity: &Entity) -> Option<&ManagedRecord> {
        self.map.record_of(entity).and_then(|id| self.map.get(id))
    }

    /// Tracks an entity that is not stored yet.
    pub fn track_new(&mut self, entity: Entity) -> CoreResult<RecordId> {
        trace!(uow = %self.id, entity_type = entity.entity_type(), "tracking new entity");
        self.map.insert(ManagedRecord::new_entity(entity))
    }

    /// Tracks an entity whose current values match its row.
    pub fn track_managed(&mut self, entity: Entity) -> CoreResult<RecordId> {
        let snapshot = Snapshot::capture(&entity);
        self.map.insert(ManagedRecord::managed(entity, snapshot))
    }

    /// Schedules a managed entity for deletion.
    ///
    /// A new entity is simply no longer tracked, since there is no row.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the entity is not tracked.
    pub fn schedule_removal(&mut self, entity: &Entity) -> CoreResult<()> {
        let id = self.map.record_of(entity).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "{}#{} is not tracked",
                entity.entity_type(),
                entity.primary_key()
            ))
        })?;
        let state = self.map.get(id).map(ManagedRecord::state);
        match state {
            Some(EntityState::New) => {
                self.map.remove_record(id);
            }
            Some(EntityState::Managed) => {
                if let Some(record) = self.map.get_mut(id) {
                    record.state = EntityState::Removed;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Columns that would be written for `entity`.
    ///
    /// For a managed entity this is its diff against the snapshot plus any
    /// foreign key waiting on a generated key, for a new one every column.
    pub fn diff(&self, entity: &Entity) -> CoreResult<Row> {
        let record = self.record(entity).ok_or_else(|| {
            CoreError::invalid_operation(format!("{} entity is not tracked", entity.entity_type()))
        })?;
        match (record.state, &record.snapshot) {
            (EntityState::New, _) => Ok(entity.column_values()),
            (_, Some(snapshot)) => Ok(managed_changes(&self.map, entity, snapshot).0),
            (_, None) => Err(CoreError::MissingSnapshot {
                type_name: entity.entity_type().to_string(),
                key: entity.primary_key(),
            }),
        }
    }

    /// Registers untracked entities referenced by tracked ones, then
    /// computes change sets.
    ///
    /// Entities registered this way stay tracked as new.
    pub fn compute_change_sets(&mut self) -> CoreResult<Vec<ChangeSet>> {
        let cascaded = self.cascade()?;
        compute_change_sets(&self.map).inspect_err(|_| self.forget(&cascaded))
    }

    /// Registers untracked targets of owning references as new, returning
    /// the records added. Nothing stays registered on error.
    fn cascade(&mut self) -> CoreResult<Vec<RecordId>> {
        let mut added = Vec::new();
        if let Err(err) = self.cascade_into(&mut added) {
            self.forget(&added);
            return Err(err);
        }
        Ok(added)
    }

    fn cascade_into(&mut self, added: &mut Vec<RecordId>) -> CoreResult<()> {
        let mut queue: Vec<Entity> = self
            .map
            .iter()
            .filter(|(_, r)| r.state != EntityState::Removed)
            .map(|(_, r)| r.entity.clone())
            .collect();
        while let Some(entity) = queue.pop() {
            for owning in entity.owning_references() {
                let Reference::Entity(target) = owning.reference else {
                    continue;
                };
                if self.map.record_of(&target).is_some() {
                    continue;
                }
                if !self.config.cascade_persist {
                    if target.primary_key().is_null() {
                        return Err(CoreError::invalid_operation(format!(
                            "{} references an untracked {} without key",
                            entity.entity_type(),
                            target.entity_type()
                        )));
                    }
                    continue;
                }
                trace!(uow = %self.id, entity_type = target.entity_type(), "cascade persist");
                added.push(self.map.insert(ManagedRecord::new_entity(target.clone()))?);
                queue.push(target);
            }
        }
        Ok(())
    }

    fn forget(&mut self, records: &[RecordId]) {
        for &record in records {
            self.map.remove_record(record);
        }
    }

    /// Writes pending changes in one transaction.
    ///
    /// States and snapshots change only after the store confirms commit; on
    /// error they are left as they were, entities registered by cascade
    /// included, so retrying is safe.
    pub fn flush<S: Store + ?Sized>(&mut self, store: &mut S) -> CoreResult<FlushReport> {
        let cascaded = self.cascade()?;
        let result = self.flush_tracked(store);
        if result.is_err() && !cascaded.is_empty() {
            debug!(uow = %self.id, forgotten = cascaded.len(), "flush failed; forgetting cascaded entities");
            self.forget(&cascaded);
        }
        result
    }

    fn flush_tracked<S: Store + ?Sized>(&mut self, store: &mut S) -> CoreResult<FlushReport> {
        let change_sets = compute_change_sets(&self.map)?;
        if change_sets.is_empty() {
            debug!(uow = %self.id, "nothing to flush");
            return Ok(FlushReport::default());
        }
        let plan = FlushPlan::build(change_sets, &self.map)?;
        let outcome = flush::execute(&plan, store, self.id)?;
        self.apply(&plan, &outcome);
        Ok(outcome.report)
    }

    fn apply(&mut self, plan: &FlushPlan, outcome: &FlushOutcome) {
        for insert in &plan.inserts {
            if let Some(generated) = outcome.generated.get(&insert.record) {
                insert.entity.apply_generated(generated);
            }
        }
        for insert in &plan.inserts {
            if let Some(record) = self.map.get_mut(insert.record) {
                record.state = EntityState::Managed;
            }
            self.map.reindex(insert.record);
        }
        for change in plan.inserts.iter().chain(&plan.updates) {
            if let Some(record) = self.map.get_mut(change.record) {
                record.snapshot = Some(Snapshot::capture(&record.entity));
            }
        }
        for delete in &plan.deletes {
            self.map.remove_record(delete.record);
        }
    }

    /// Detaches every tracked entity.
    pub fn clear(&mut self) {
        debug!(uow = %self.id, detached = self.map.len(), "clearing unit of work");
        self.map.clear();
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityDescriptor, FieldDescriptor, KeyStrategy};
    use entimap_codec::Value;
    use entimap_store::{InMemoryStore, TableSchema, ColumnSchema, KeyGeneration};
    use std::sync::Arc;

    fn descriptor() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::new("user", "id")
                .key_strategy(KeyStrategy::AutoIncrement)
                .field(FieldDescriptor::text("name").default_value("Default")),
        )
    }

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .create_table(
                TableSchema::new("user", "id")
                    .key_generation(KeyGeneration::AutoIncrement)
                    .column(ColumnSchema::new("name")),
            )
            .unwrap();
        store
    }

    #[test]
    fn flush_assigns_generated_keys_after_commit() {
        let mut uow = UnitOfWork::default();
        let mut store = store();
        let user = Entity::build(descriptor(), &Row::new().with("name", "a"), true).unwrap();
        uow.track_new(user.clone()).unwrap();

        let report = uow.flush(&mut store).unwrap();
        assert_eq!(report.inserts, 1);
        assert_eq!(user.primary_key(), Value::Integer(1));
        assert_eq!(uow.state_of(&user), EntityState::Managed);
        assert!(uow.identity_map().lookup("user", &Value::Integer(1)).is_some());
        assert!(uow.diff(&user).unwrap().is_empty());
    }

    #[test]
    fn failed_flush_leaves_tracking_untouched() {
        let mut uow = UnitOfWork::default();
        let mut store = InMemoryStore::new();
        let user = Entity::build(descriptor(), &Row::new(), true).unwrap();
        uow.track_new(user.clone()).unwrap();

        assert!(uow.flush(&mut store).is_err());
        assert_eq!(uow.state_of(&user), EntityState::New);
        assert!(user.primary_key().is_null());
        assert!(!store.in_transaction());
    }

    #[test]
    fn removing_new_entity_untracks_it() {
        let mut uow = UnitOfWork::default();
        let user = Entity::build(descriptor(), &Row::new(), true).unwrap();
        uow.track_new(user.clone()).unwrap();
        uow.schedule_removal(&user).unwrap();
        assert_eq!(uow.state_of(&user), EntityState::Detached);
        assert!(uow.compute_change_sets().unwrap().is_empty());
    }

    #[test]
    fn empty_flush_opens_no_transaction() {
        let mut uow = UnitOfWork::default();
        let mut store = store();
        assert!(uow.flush(&mut store).unwrap().is_empty());
        assert!(store.statements().is_empty());
    }
}
