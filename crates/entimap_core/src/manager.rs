//! Entity manager facade.

use crate::config::Config;
use crate::entity::{Entity, Reference};
use crate::error::{CoreError, CoreResult};
use crate::identity_map::ManagedRecord;
use crate::metadata::{Cardinality, EntityDescriptor, MetadataRegistry, RelationshipDescriptor};
use crate::snapshot::Snapshot;
use crate::types::{EntityState, UnitOfWorkId};
use crate::unit_of_work::{ChangeSet, FlushReport, UnitOfWork};
use entimap_codec::{Row, Value};
use entimap_store::Store;
use std::sync::Arc;
use tracing::{debug, trace};

/// Public entry point: one session over a store.
///
/// The manager owns its unit of work and is passed explicitly wherever it
/// is needed; there is no ambient current session.
///
/// # Example
///
/// ```rust
/// use entimap_codec::{Row, Value};
/// use entimap_core::{EntityDescriptor, EntityManager, FieldDescriptor, MetadataRegistry};
/// use entimap_store::InMemoryStore;
/// use std::sync::Arc;
///
/// let registry = MetadataRegistry::new()
///     .with(EntityDescriptor::new("user", "id").field(FieldDescriptor::text("name")))
///     .unwrap();
/// let store = InMemoryStore::new();
/// store.create_tables(registry.table_schemas()).unwrap();
///
/// let mut em = EntityManager::new(Arc::new(registry), store).unwrap();
/// em.create("user", Row::new().with("id", 1).with("name", "Some User")).unwrap();
/// em.flush().unwrap();
///
/// em.clear();
/// let user = em.find_one_or_fail("user", 1).unwrap();
/// assert_eq!(user.get("name").unwrap(), Value::from("Some User"));
/// ```
#[derive(Debug)]
pub struct EntityManager<S: Store> {
    registry: Arc<MetadataRegistry>,
    uow: UnitOfWork,
    store: S,
}

impl<S: Store> EntityManager<S> {
    /// Creates a manager with default configuration.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` if relationships in the registry do not line up.
    pub fn new(registry: Arc<MetadataRegistry>, store: S) -> CoreResult<Self> {
        Self::with_config(registry, store, Config::default())
    }

    /// Creates a manager with the given configuration.
    pub fn with_config(registry: Arc<MetadataRegistry>, store: S, config: Config) -> CoreResult<Self> {
        registry.validate()?;
        let uow = UnitOfWork::new(config);
        debug!(uow = %uow.id(), types = registry.len(), "entity manager opened");
        Ok(Self {
            registry,
            uow,
            store,
        })
    }

    /// Unit-of-work identifier.
    #[must_use]
    pub fn id(&self) -> UnitOfWorkId {
        self.uow.id()
    }

    /// The metadata registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    /// The unit of work.
    #[must_use]
    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    /// The store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The store, mutably.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consumes the manager, returning the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Builds a new entity and tracks it.
    ///
    /// Fields not in `values` take their declared default. A value under an
    /// owning relation name is taken as its foreign key.
    pub fn create(&mut self, entity_type: &str, values: Row) -> CoreResult<Entity> {
        let descriptor = self.registry.describe(entity_type)?;
        let config = self.uow.config();
        let entity = Entity::build(descriptor, &values, config.validate_required)?;
        if config.hydrate_known_references {
            self.bind_known_references(&entity);
        }
        self.uow.track_new(entity.clone())?;
        Ok(entity)
    }

    /// Finds an entity by key, loading it if it is not tracked.
    ///
    /// Entities scheduled for removal are not returned.
    pub fn find_one(&mut self, entity_type: &str, key: impl Into<Value>) -> CoreResult<Option<Entity>> {
        let key = key.into();
        let descriptor = self.registry.describe(entity_type)?;
        if let Some(id) = self.uow.identity_map().lookup(entity_type, &key) {
            let record = self.uow.identity_map().get(id);
            return Ok(record
                .filter(|r| r.state() != EntityState::Removed)
                .map(|r| r.entity().clone()));
        }

        debug!(uow = %self.uow.id(), entity_type, %key, "loading entity");
        let Some(row) = self.store.fetch_by_key(entity_type, &key)? else {
            return Ok(None);
        };
        self.hydrate(descriptor, &row).map(Some)
    }

    /// Finds an entity by key.
    ///
    /// # Errors
    ///
    /// `NotFound` if the store has no such row.
    pub fn find_one_or_fail(&mut self, entity_type: &str, key: impl Into<Value>) -> CoreResult<Entity> {
        let key = key.into();
        self.find_one(entity_type, key.clone())?
            .ok_or_else(|| CoreError::not_found(entity_type, key))
    }

    /// Schedules a managed entity for deletion, or forgets a new one.
    pub fn remove(&mut self, entity: &Entity) -> CoreResult<()> {
        self.uow.schedule_removal(entity)
    }

    /// Tracks an untracked entity as new.
    ///
    /// Used to re-register an entity after `clear`. Returns the entity
    /// itself if it is already tracked.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if a different instance with the same key is
    /// tracked.
    pub fn persist(&mut self, entity: &Entity) -> CoreResult<Entity> {
        self.registry.describe(entity.entity_type())?;
        self.uow.track_new(entity.clone())?;
        Ok(entity.clone())
    }

    /// Tracks an untracked entity that already exists in the store.
    ///
    /// Its current values become the snapshot. If the key is already
    /// tracked the tracked instance is returned instead.
    pub fn merge(&mut self, entity: &Entity) -> CoreResult<Entity> {
        self.registry.describe(entity.entity_type())?;
        let key = entity.primary_key();
        if key.is_null() {
            return Err(CoreError::invalid_operation(format!(
                "cannot merge {} without a primary key",
                entity.entity_type()
            )));
        }
        let map = self.uow.identity_map();
        let tracked = map
            .record_of(entity)
            .or_else(|| map.lookup(entity.entity_type(), &key))
            .and_then(|id| map.get(id))
            .map(|r| r.entity().clone());
        if let Some(tracked) = tracked {
            return Ok(tracked);
        }
        self.uow.track_managed(entity.clone())?;
        Ok(entity.clone())
    }

    /// Writes all pending changes in one transaction.
    pub fn flush(&mut self) -> CoreResult<FlushReport> {
        self.uow.flush(&mut self.store)
    }

    /// Detaches every tracked entity.
    pub fn clear(&mut self) {
        self.uow.clear();
    }

    /// Pending change sets, without writing anything.
    pub fn compute_change_sets(&mut self) -> CoreResult<Vec<ChangeSet>> {
        self.uow.compute_change_sets()
    }

    /// Lifecycle state of `entity`.
    #[must_use]
    pub fn state_of(&self, entity: &Entity) -> EntityState {
        self.uow.state_of(entity)
    }

    /// Snapshot of a tracked entity.
    #[must_use]
    pub fn snapshot_of(&self, entity: &Entity) -> Option<Snapshot> {
        self.uow.snapshot_of(entity)
    }

    /// Columns that would be written for `entity`.
    pub fn diff(&self, entity: &Entity) -> CoreResult<Row> {
        self.uow.diff(entity)
    }

    /// Returns true if flushing would write `entity`.
    pub fn is_dirty(&self, entity: &Entity) -> CoreResult<bool> {
        match self.state_of(entity) {
            EntityState::New | EntityState::Removed => Ok(true),
            _ => Ok(!self.diff(entity)?.is_empty()),
        }
    }

    /// Dereferences a to-one relationship.
    ///
    /// An owning relation whose target is not loaded yet is loaded and
    /// bound in place; an inverse one-to-one is looked up through the
    /// owning side. Neither changes any diff.
    pub fn resolve(&mut self, entity: &Entity, relation: &str) -> CoreResult<Option<Entity>> {
        let relationship = entity.descriptor().require_relationship(relation)?.clone();
        if relationship.owning {
            return self.resolve_owning(entity, &relationship);
        }
        if relationship.cardinality == Cardinality::OneToMany {
            return Err(CoreError::invalid_operation(format!(
                "{}.{relation} is a collection; use resolve_many",
                entity.entity_type()
            )));
        }
        Ok(self.resolve_inverse(entity, &relationship)?.into_iter().next())
    }

    /// Loads the entities on the other side of an inverse relationship,
    /// ordered by primary key.
    pub fn resolve_many(&mut self, entity: &Entity, relation: &str) -> CoreResult<Vec<Entity>> {
        let relationship = entity.descriptor().require_relationship(relation)?.clone();
        if relationship.owning {
            return Ok(self.resolve_owning(entity, &relationship)?.into_iter().collect());
        }
        self.resolve_inverse(entity, &relationship)
    }

    fn resolve_owning(
        &mut self,
        entity: &Entity,
        relationship: &RelationshipDescriptor,
    ) -> CoreResult<Option<Entity>> {
        match entity.reference(&relationship.name)? {
            Reference::None => Ok(None),
            Reference::Entity(target) => Ok(Some(target)),
            Reference::Key(key) => {
                let target = self
                    .find_one(&relationship.target, key.clone())?
                    .ok_or_else(|| CoreError::not_found(&relationship.target, key))?;
                entity.bind_reference(&relationship.name, &target);
                trace!(
                    entity_type = entity.entity_type(),
                    relation = %relationship.name,
                    "reference resolved"
                );
                Ok(Some(target))
            }
        }
    }

    fn resolve_inverse(
        &mut self,
        entity: &Entity,
        relationship: &RelationshipDescriptor,
    ) -> CoreResult<Vec<Entity>> {
        let target_descriptor = self.registry.describe(&relationship.target)?;
        let mapped_by = relationship.inverse.clone().unwrap_or_default();
        let owner = target_descriptor.require_relationship(&mapped_by)?;
        let column = owner.column().unwrap_or_default().to_string();

        let key = entity.primary_key();
        if !key.is_null() {
            for row in self.store.fetch_by_column(&relationship.target, &column, &key)? {
                self.hydrate(Arc::clone(&target_descriptor), &row)?;
            }
        }

        // In-memory foreign keys win over stored ones.
        let mut related: Vec<Entity> = self
            .uow
            .identity_map()
            .iter()
            .filter(|(_, r)| r.state() != EntityState::Removed)
            .map(|(_, r)| r.entity())
            .filter(|candidate| {
                candidate.entity_type() == relationship.target
                    && candidate.refers_to(&mapped_by, entity)
            })
            .cloned()
            .collect();
        related.sort_by(|a, b| a.primary_key().cmp_total(&b.primary_key()));
        Ok(related)
    }

    /// Returns the tracked instance for `row`, hydrating and tracking a new
    /// one with a fresh snapshot if the key is unknown.
    fn hydrate(&mut self, descriptor: Arc<EntityDescriptor>, row: &Row) -> CoreResult<Entity> {
        let key = row.get(&descriptor.primary_key).cloned().unwrap_or_default();
        let entity_type = descriptor.name.clone();
        let bind = self.uow.config().hydrate_known_references;
        let (id, created) = {
            let map = self.uow.identity_map_mut();
            map.get_or_create(&entity_type, &key, || {
                let entity = Entity::hydrate(descriptor, row);
                let snapshot = Snapshot::capture(&entity);
                Ok(ManagedRecord::managed(entity, snapshot))
            })?
        };
        let entity = self
            .uow
            .identity_map()
            .get(id)
            .map(|r| r.entity().clone())
            .ok_or_else(|| CoreError::not_found(&entity_type, key))?;
        if created && bind {
            self.bind_known_references(&entity);
        }
        Ok(entity)
    }

    /// Binds unresolved owning references to instances already tracked.
    fn bind_known_references(&self, entity: &Entity) {
        let map = self.uow.identity_map();
        for relationship in entity.descriptor().owning_relationships() {
            let Ok(Reference::Key(key)) = entity.reference(&relationship.name) else {
                continue;
            };
            if let Some(target) = map
                .lookup(&relationship.target, &key)
                .and_then(|id| map.get(id))
                .filter(|r| r.state() != EntityState::Removed)
            {
                entity.bind_reference(&relationship.name, target.entity());
            }
        }
    }
}
