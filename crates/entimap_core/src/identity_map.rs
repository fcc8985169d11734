//! Identity map of tracked entities.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::snapshot::Snapshot;
use crate::types::{EntityState, RecordId};
use entimap_codec::Value;
use std::collections::{BTreeMap, HashMap};

/// Identity of a row: entity type plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Entity type name.
    pub entity_type: String,
    /// Primary key value.
    pub key: Value,
}

impl EntityKey {
    /// Creates a key.
    pub fn new(entity_type: impl Into<String>, key: Value) -> Self {
        Self {
            entity_type: entity_type.into(),
            key,
        }
    }
}

/// An entity tracked by a unit of work.
#[derive(Debug, Clone)]
pub struct ManagedRecord {
    pub(crate) entity: Entity,
    pub(crate) state: EntityState,
    pub(crate) snapshot: Option<Snapshot>,
}

impl ManagedRecord {
    /// A record for an entity that has not been inserted yet.
    #[must_use]
    pub fn new_entity(entity: Entity) -> Self {
        Self {
            entity,
            state: EntityState::New,
            snapshot: None,
        }
    }

    /// A record for an entity backed by a row, with its baseline.
    #[must_use]
    pub fn managed(entity: Entity, snapshot: Snapshot) -> Self {
        Self {
            entity,
            state: EntityState::Managed,
            snapshot: Some(snapshot),
        }
    }

    /// The tracked instance.
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Dirty-check baseline; absent for new entities.
    #[must_use]
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }
}

/// Per-unit-of-work map guaranteeing one instance per row.
///
/// Records iterate in registration order. New entities whose key the
/// store will generate are tracked by instance only and gain a key entry
/// once inserted.
#[derive(Debug, Default)]
pub struct IdentityMap {
    records: BTreeMap<RecordId, ManagedRecord>,
    by_key: HashMap<EntityKey, RecordId>,
    by_instance: HashMap<usize, RecordId>,
    next_id: RecordId,
}

impl IdentityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up the record for a row.
    #[must_use]
    pub fn lookup(&self, entity_type: &str, key: &Value) -> Option<RecordId> {
        if key.is_null() {
            return None;
        }
        self.by_key
            .get(&EntityKey::new(entity_type, key.clone()))
            .copied()
    }

    /// Looks up the record tracking this instance.
    #[must_use]
    pub fn record_of(&self, entity: &Entity) -> Option<RecordId> {
        self.by_instance.get(&entity.addr()).copied()
    }

    /// Returns a record.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&ManagedRecord> {
        self.records.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: RecordId) -> Option<&mut ManagedRecord> {
        self.records.get_mut(&id)
    }

    /// Returns the record for a row, creating it with `factory` if absent.
    ///
    /// The boolean is true when the factory ran.
    pub fn get_or_create<F>(
        &mut self,
        entity_type: &str,
        key: &Value,
        factory: F,
    ) -> CoreResult<(RecordId, bool)>
    where
        F: FnOnce() -> CoreResult<ManagedRecord>,
    {
        if let Some(id) = self.lookup(entity_type, key) {
            return Ok((id, false));
        }
        let record = factory()?;
        if record.entity.entity_type() != entity_type || record.entity.primary_key() != *key {
            return Err(CoreError::invalid_operation(format!(
                "factory for {entity_type}#{key} produced {}#{}",
                record.entity.entity_type(),
                record.entity.primary_key()
            )));
        }
        Ok((self.insert(record)?, true))
    }

    /// Starts tracking a record.
    ///
    /// Tracking an already tracked instance returns its existing record.
    ///
    /// # Errors
    ///
    /// Fails if another instance is tracked under the same key.
    pub fn insert(&mut self, record: ManagedRecord) -> CoreResult<RecordId> {
        if let Some(id) = self.record_of(&record.entity) {
            return Ok(id);
        }
        let entity_type = record.entity.entity_type().to_string();
        let key = record.entity.primary_key();
        if self.lookup(&entity_type, &key).is_some() {
            return Err(CoreError::invalid_operation(format!(
                "another instance of {entity_type}#{key} is already tracked"
            )));
        }

        self.next_id = self.next_id.next();
        let id = self.next_id;
        self.by_instance.insert(record.entity.addr(), id);
        if !key.is_null() {
            self.by_key.insert(EntityKey::new(entity_type, key), id);
        }
        self.records.insert(id, record);
        Ok(id)
    }

    /// Re-indexes a record under its current primary key.
    pub(crate) fn reindex(&mut self, id: RecordId) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        let key = EntityKey::new(record.entity.entity_type(), record.entity.primary_key());
        self.by_key.retain(|_, existing| *existing != id);
        if !key.key.is_null() {
            self.by_key.insert(key, id);
        }
    }

    /// Stops tracking a row. No-op if absent.
    pub fn remove(&mut self, entity_type: &str, key: &Value) -> Option<ManagedRecord> {
        let id = self.lookup(entity_type, key)?;
        self.remove_record(id)
    }

    /// Stops tracking a record.
    pub fn remove_record(&mut self, id: RecordId) -> Option<ManagedRecord> {
        let record = self.records.remove(&id)?;
        self.by_instance.remove(&record.entity.addr());
        self.by_key.retain(|_, existing| *existing != id);
        Some(record)
    }

    /// Detaches every tracked entity.
    pub fn clear(&mut self) {
        self.records.clear();
        self.by_key.clear();
        self.by_instance.clear();
    }

    /// Records in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &ManagedRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityDescriptor, FieldDescriptor, KeyStrategy};
    use entimap_codec::Row;
    use std::sync::Arc;

    fn user(id: impl Into<Value>) -> Entity {
        let descriptor = Arc::new(
            EntityDescriptor::new("user", "id")
                .key_strategy(KeyStrategy::AutoIncrement)
                .field(FieldDescriptor::text("name").default_value("Default")),
        );
        Entity::build(descriptor, &Row::new().with("id", id.into()), true).unwrap()
    }

    #[test]
    fn get_or_create_returns_existing() {
        let mut map = IdentityMap::new();
        let key = Value::Integer(1);
        let (first, created) = map
            .get_or_create("user", &key, || Ok(ManagedRecord::new_entity(user(1))))
            .unwrap();
        assert!(created);
        let (second, created) = map
            .get_or_create("user", &key, || panic!("factory must not run"))
            .unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn factory_errors_propagate() {
        let mut map = IdentityMap::new();
        let result = map.get_or_create("user", &Value::Integer(1), || {
            Err(CoreError::not_found("user", Value::Integer(1)))
        });
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
        assert!(map.is_empty());
    }

    #[test]
    fn duplicate_instances_rejected() {
        let mut map = IdentityMap::new();
        map.insert(ManagedRecord::new_entity(user(1))).unwrap();
        assert!(map.insert(ManagedRecord::new_entity(user(1))).is_err());
    }

    #[test]
    fn same_instance_tracked_once() {
        let mut map = IdentityMap::new();
        let entity = user(1);
        let a = map.insert(ManagedRecord::new_entity(entity.clone())).unwrap();
        let b = map.insert(ManagedRecord::new_entity(entity.clone())).unwrap();
        assert_eq!(a, b);
        assert_eq!(map.record_of(&entity), Some(a));
    }

    #[test]
    fn unkeyed_entities_indexed_after_reindex() {
        let mut map = IdentityMap::new();
        let entity = user(Value::Null);
        let id = map.insert(ManagedRecord::new_entity(entity.clone())).unwrap();
        assert_eq!(map.lookup("user", &Value::Integer(5)), None);

        entity.apply_generated(&Row::new().with("id", 5));
        map.reindex(id);
        assert_eq!(map.lookup("user", &Value::Integer(5)), Some(id));
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let mut map = IdentityMap::new();
        assert!(map.remove("user", &Value::Integer(1)).is_none());
        let entity = user(1);
        map.insert(ManagedRecord::new_entity(entity.clone())).unwrap();
        assert!(map.remove("user", &Value::Integer(1)).is_some());
        assert_eq!(map.record_of(&entity), None);
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut map = IdentityMap::new();
        for id in [3, 1, 2] {
            map.insert(ManagedRecord::new_entity(user(id))).unwrap();
        }
        let keys: Vec<_> = map.iter().map(|(_, r)| r.entity().primary_key()).collect();
        assert_eq!(keys, vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn clear_detaches_everything() {
        let mut map = IdentityMap::new();
        let entity = user(1);
        map.insert(ManagedRecord::new_entity(entity.clone())).unwrap();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.record_of(&entity), None);
    }
}
