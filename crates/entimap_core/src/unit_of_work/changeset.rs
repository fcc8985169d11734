//! Change-set computation.

use crate::entity::{Entity, Reference};
use crate::error::{CoreError, CoreResult};
use crate::identity_map::{IdentityMap, ManagedRecord};
use crate::snapshot::{diff, Snapshot};
use crate::types::{EntityState, RecordId};
use entimap_codec::{Row, Value};
use std::fmt;
use tracing::trace;

/// Kind of write a change set requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Insert a new row.
    Create,
    /// Update changed columns of an existing row.
    Update,
    /// Delete the row.
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A foreign key column whose value comes from an entity inserted in the
/// same flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dependency {
    pub(crate) column: String,
    pub(crate) target: RecordId,
    pub(crate) nullable: bool,
}

/// What to write for one entity.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub(crate) record: RecordId,
    pub(crate) entity: Entity,
    pub(crate) kind: ChangeKind,
    pub(crate) key: Value,
    pub(crate) payload: Row,
    pub(crate) dependencies: Vec<Dependency>,
}

impl ChangeSet {
    /// Record in the identity map.
    #[must_use]
    pub fn record(&self) -> RecordId {
        self.record
    }

    /// The entity being written.
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Entity type, also the table written.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.entity.entity_type()
    }

    /// Kind of write.
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Primary key; `Null` for a create whose key the store generates.
    #[must_use]
    pub fn key(&self) -> &Value {
        &self.key
    }

    /// Columns to write: every column for a create, changed columns for an
    /// update, nothing for a delete.
    #[must_use]
    pub fn payload(&self) -> &Row {
        &self.payload
    }

    /// Records that must be inserted before this change set runs.
    pub fn depends_on(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.dependencies.iter().map(|d| d.target)
    }

    pub(crate) fn label(&self) -> String {
        format!("{}#{}", self.entity_type(), self.key)
    }
}

/// Computes pending change sets in identity-map order.
///
/// Managed entities are compared against their snapshot; one whose diff
/// is empty produces nothing.
///
/// # Errors
///
/// `MissingSnapshot` for a managed record without baseline, and
/// `InvalidOperation` when a managed entity's primary key was changed.
pub fn compute_change_sets(map: &IdentityMap) -> CoreResult<Vec<ChangeSet>> {
    let mut change_sets = Vec::new();
    for (id, record) in map.iter() {
        if let Some(change_set) = compute_one(map, id, record)? {
            change_sets.push(change_set);
        }
    }
    Ok(change_sets)
}

fn compute_one(
    map: &IdentityMap,
    id: RecordId,
    record: &ManagedRecord,
) -> CoreResult<Option<ChangeSet>> {
    let entity = &record.entity;
    let descriptor = entity.descriptor();
    let change_set = |kind: ChangeKind, key: Value, payload: Row, dependencies: Vec<Dependency>| {
        ChangeSet {
            record: id,
            entity: entity.clone(),
            kind,
            key,
            payload,
            dependencies,
        }
    };

    match record.state {
        EntityState::New => {
            let mut payload = entity.column_values();
            let key = entity.primary_key();
            if key.is_null() {
                payload.remove(&descriptor.primary_key);
            }
            let dependencies = pending_dependencies(map, entity);
            Ok(Some(change_set(ChangeKind::Create, key, payload, dependencies)))
        }
        EntityState::Managed => {
            let snapshot = record.snapshot.as_ref().ok_or_else(|| CoreError::MissingSnapshot {
                type_name: descriptor.name.clone(),
                key: entity.primary_key(),
            })?;
            let (changes, dependencies) = managed_changes(map, entity, snapshot);
            if changes.is_empty() {
                return Ok(None);
            }
            if let Some(new_key) = changes.get(&descriptor.primary_key) {
                return Err(CoreError::invalid_operation(format!(
                    "primary key of {}#{} changed to {new_key}",
                    descriptor.name,
                    snapshot.get(&descriptor.primary_key).cloned().unwrap_or_default()
                )));
            }
            let key = snapshot
                .get(&descriptor.primary_key)
                .cloned()
                .unwrap_or_default();
            trace!(entity_type = %descriptor.name, %key, columns = ?changes.columns().collect::<Vec<_>>(), "update pending");
            Ok(Some(change_set(ChangeKind::Update, key, changes, dependencies)))
        }
        EntityState::Removed => {
            let key = record
                .snapshot
                .as_ref()
                .and_then(|s| s.get(&descriptor.primary_key).cloned())
                .unwrap_or_else(|| entity.primary_key());
            Ok(Some(change_set(ChangeKind::Delete, key, Row::new(), Vec::new())))
        }
        EntityState::Detached => Ok(None),
    }
}

/// Columns to update for a managed entity, with the inserts they wait on.
///
/// A foreign key to an entity whose key the store has yet to generate is
/// still `Null` in memory; it is written anyway so the flush can fill in
/// the generated key.
pub(crate) fn managed_changes(
    map: &IdentityMap,
    entity: &Entity,
    snapshot: &Snapshot,
) -> (Row, Vec<Dependency>) {
    let current = entity.column_values();
    let mut changes = diff(&current, snapshot);
    let mut dependencies = Vec::new();
    for dependency in pending_dependencies(map, entity) {
        if !changes.contains(&dependency.column) {
            let unassigned = current.get(&dependency.column).map_or(true, Value::is_null);
            if !unassigned {
                continue;
            }
            changes.insert(dependency.column.clone(), Value::Null);
        }
        dependencies.push(dependency);
    }
    (changes, dependencies)
}

/// Foreign keys of `entity` that point at entities still awaiting
/// insertion, whether the target is loaded or only known by key.
fn pending_dependencies(map: &IdentityMap, entity: &Entity) -> Vec<Dependency> {
    entity
        .owning_references()
        .into_iter()
        .filter_map(|owning| {
            let target = match &owning.reference {
                Reference::None => return None,
                Reference::Entity(target) => map.record_of(target)?,
                Reference::Key(key) => map.lookup(&owning.target_type, key)?,
            };
            let pending = map
                .get(target)
                .is_some_and(|record| record.state == EntityState::New);
            pending.then_some(Dependency {
                column: owning.column,
                target,
                nullable: owning.nullable,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityDescriptor, FieldDescriptor, KeyStrategy, RelationshipDescriptor};
    use std::sync::Arc;

    fn user_descriptor() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::new("user", "id")
                .key_strategy(KeyStrategy::AutoIncrement)
                .field(FieldDescriptor::text("name").default_value("Default"))
                .field(FieldDescriptor::integer("balance").default_value(0)),
        )
    }

    fn blog_descriptor() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::new("blog", "id")
                .field(FieldDescriptor::text("title").nullable(true))
                .relationship(RelationshipDescriptor::one_to_one("author", "user")),
        )
    }

    fn loaded(map: &mut IdentityMap, row: Row) -> Entity {
        let entity = Entity::hydrate(user_descriptor(), &row);
        map.insert(ManagedRecord::managed(entity.clone(), Snapshot::capture(&entity)))
            .unwrap();
        entity
    }

    #[test]
    fn clean_managed_entity_produces_nothing() {
        let mut map = IdentityMap::new();
        loaded(&mut map, Row::new().with("id", 1).with("name", "a").with("balance", 5));
        assert!(compute_change_sets(&map).unwrap().is_empty());
    }

    #[test]
    fn update_carries_only_changed_columns() {
        let mut map = IdentityMap::new();
        let user = loaded(&mut map, Row::new().with("id", 1).with("name", "a").with("balance", 5));
        user.set("balance", 6).unwrap();

        let change_sets = compute_change_sets(&map).unwrap();
        assert_eq!(change_sets.len(), 1);
        assert_eq!(change_sets[0].kind(), ChangeKind::Update);
        assert_eq!(change_sets[0].payload(), &Row::new().with("balance", 6));
        assert_eq!(change_sets[0].key(), &Value::Integer(1));
    }

    #[test]
    fn reverting_a_change_is_clean() {
        let mut map = IdentityMap::new();
        let user = loaded(&mut map, Row::new().with("id", 1).with("name", "a").with("balance", 5));
        user.set("name", "b").unwrap();
        user.set("name", "a").unwrap();
        assert!(compute_change_sets(&map).unwrap().is_empty());
    }

    #[test]
    fn create_sends_every_column() {
        let mut map = IdentityMap::new();
        let user = Entity::build(user_descriptor(), &Row::new(), true).unwrap();
        map.insert(ManagedRecord::new_entity(user)).unwrap();

        let change_sets = compute_change_sets(&map).unwrap();
        assert_eq!(change_sets[0].kind(), ChangeKind::Create);
        assert_eq!(
            change_sets[0].payload(),
            &Row::new().with("name", "Default").with("balance", 0)
        );
        assert!(change_sets[0].key().is_null());
    }

    #[test]
    fn missing_snapshot_is_reported() {
        let mut map = IdentityMap::new();
        let user = Entity::hydrate(user_descriptor(), &Row::new().with("id", 1));
        let mut record = ManagedRecord::new_entity(user);
        record.state = EntityState::Managed;
        map.insert(record).unwrap();

        assert!(matches!(
            compute_change_sets(&map),
            Err(CoreError::MissingSnapshot { .. })
        ));
    }

    #[test]
    fn changing_managed_key_is_rejected() {
        let mut map = IdentityMap::new();
        let user = loaded(&mut map, Row::new().with("id", 1).with("name", "a").with("balance", 5));
        user.set("id", 2).unwrap();
        assert!(matches!(
            compute_change_sets(&map),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn removed_entity_deletes_by_snapshot_key() {
        let mut map = IdentityMap::new();
        let user = loaded(&mut map, Row::new().with("id", 1).with("name", "a").with("balance", 5));
        let id = map.record_of(&user).unwrap();
        map.get_mut(id).unwrap().state = EntityState::Removed;

        let change_sets = compute_change_sets(&map).unwrap();
        assert_eq!(change_sets[0].kind(), ChangeKind::Delete);
        assert!(change_sets[0].payload().is_empty());
        assert_eq!(change_sets[0].key(), &Value::Integer(1));
    }

    #[test]
    fn reference_to_new_entity_is_a_dependency() {
        let mut map = IdentityMap::new();
        let user = Entity::build(user_descriptor(), &Row::new(), true).unwrap();
        let blog = Entity::build(blog_descriptor(), &Row::new().with("id", 1), true).unwrap();
        blog.set_reference("author", &user).unwrap();
        let user_record = map.insert(ManagedRecord::new_entity(user)).unwrap();
        map.insert(ManagedRecord::new_entity(blog)).unwrap();

        let change_sets = compute_change_sets(&map).unwrap();
        let blog_change = &change_sets[1];
        assert_eq!(blog_change.depends_on().collect::<Vec<_>>(), vec![user_record]);
        assert_eq!(blog_change.payload().get("author_id"), Some(&Value::Null));
    }

    #[test]
    fn managed_reference_to_unkeyed_new_entity_is_written() {
        let mut map = IdentityMap::new();
        let blog = Entity::hydrate(blog_descriptor(), &Row::new().with("id", 1).with("title", "t"));
        map.insert(ManagedRecord::managed(blog.clone(), Snapshot::capture(&blog)))
            .unwrap();
        let user = Entity::build(user_descriptor(), &Row::new(), true).unwrap();
        let user_record = map.insert(ManagedRecord::new_entity(user.clone())).unwrap();
        blog.set_reference("author", &user).unwrap();

        let change_sets = compute_change_sets(&map).unwrap();
        let update = change_sets
            .iter()
            .find(|c| c.kind() == ChangeKind::Update)
            .unwrap();
        assert_eq!(update.payload(), &Row::new().with("author_id", Value::Null));
        assert_eq!(update.depends_on().collect::<Vec<_>>(), vec![user_record]);
    }

    #[test]
    fn key_reference_to_tracked_new_entity_is_a_dependency() {
        let assigned_user = Arc::new(
            EntityDescriptor::new("user", "id").field(FieldDescriptor::text("name").nullable(true)),
        );
        let mut map = IdentityMap::new();
        let blog = Entity::build(blog_descriptor(), &Row::new().with("id", 1).with("author", 7), true)
            .unwrap();
        map.insert(ManagedRecord::new_entity(blog)).unwrap();
        let user = Entity::build(assigned_user, &Row::new().with("id", 7), true).unwrap();
        let user_record = map.insert(ManagedRecord::new_entity(user)).unwrap();

        let change_sets = compute_change_sets(&map).unwrap();
        assert_eq!(change_sets[0].depends_on().collect::<Vec<_>>(), vec![user_record]);
        assert_eq!(change_sets[0].payload().get("author_id"), Some(&Value::Integer(7)));
    }

    #[test]
    fn managed_reference_to_stored_entity_adds_nothing() {
        let mut map = IdentityMap::new();
        let user = loaded(&mut map, Row::new().with("id", 3).with("name", "a").with("balance", 5));
        let blog = Entity::hydrate(
            blog_descriptor(),
            &Row::new().with("id", 1).with("author_id", 3),
        );
        map.insert(ManagedRecord::managed(blog.clone(), Snapshot::capture(&blog)))
            .unwrap();
        blog.set_reference("author", &user).unwrap();

        assert!(compute_change_sets(&map).unwrap().is_empty());
    }
}
