//! Entity handles.
//!
//! An [`Entity`] is a cheap, cloneable handle onto one in-memory instance.
//! Clones share state; identity is pointer identity of the shared
//! allocation, so the identity map can tell instances apart even before
//! they have a primary key.

use crate::error::{CoreError, CoreResult};
use crate::metadata::{EntityDescriptor, KeyStrategy, RelationshipDescriptor};
use entimap_codec::{Row, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Value of an owning relationship.
#[derive(Clone, Default)]
pub enum Reference {
    /// No related entity.
    #[default]
    None,
    /// Foreign key known, related entity not loaded.
    Key(Value),
    /// Related entity loaded or assigned.
    Entity(Entity),
}

/// An owning relationship as seen from the row that holds the foreign key.
#[derive(Debug, Clone)]
pub(crate) struct OwningReference {
    pub(crate) column: String,
    pub(crate) nullable: bool,
    pub(crate) target_type: String,
    pub(crate) reference: Reference,
}

impl Reference {
    /// Foreign key scalar of this reference.
    ///
    /// An assigned entity without a key yet yields `Null`.
    #[must_use]
    pub fn key(&self) -> Value {
        match self {
            Self::None => Value::Null,
            Self::Key(key) => key.clone(),
            Self::Entity(entity) => entity.primary_key(),
        }
    }

    /// Returns the loaded entity, if any.
    #[must_use]
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Returns true for [`Reference::None`].
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Key(key) => write!(f, "Key({key})"),
            Self::Entity(entity) => write!(f, "Entity({}#{})", entity.entity_type(), entity.primary_key()),
        }
    }
}

#[derive(Debug, Default)]
struct EntityValues {
    fields: BTreeMap<String, Value>,
    references: BTreeMap<String, Reference>,
}

struct EntityInner {
    descriptor: Arc<EntityDescriptor>,
    values: RwLock<EntityValues>,
}

/// Handle onto an entity instance.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    fn from_values(descriptor: Arc<EntityDescriptor>, values: EntityValues) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                descriptor,
                values: RwLock::new(values),
            }),
        }
    }

    /// Builds a new instance from caller-supplied values.
    ///
    /// Missing fields take their declared default, else `Null`. A value
    /// under a relation name is taken as that relation's foreign key.
    pub(crate) fn build(
        descriptor: Arc<EntityDescriptor>,
        initial: &Row,
        validate_required: bool,
    ) -> CoreResult<Self> {
        for (name, _) in initial.iter() {
            if descriptor.get_field(name).is_none() && descriptor.get_relationship(name).is_none() {
                return Err(CoreError::UnknownField {
                    type_name: descriptor.name.clone(),
                    field: name.clone(),
                });
            }
        }

        let mut values = EntityValues::default();
        for field in &descriptor.fields {
            let value = match initial.get(&field.name) {
                Some(value) => value.clone(),
                None => field.default.clone().unwrap_or(Value::Null),
            };
            let value = if value.is_null() && field.name == descriptor.primary_key {
                match descriptor.key_strategy {
                    KeyStrategy::Uuid => Value::Text(Uuid::new_v4().to_string()),
                    KeyStrategy::AutoIncrement => Value::Null,
                    KeyStrategy::Assigned if validate_required => {
                        return Err(CoreError::MissingRequiredField {
                            type_name: descriptor.name.clone(),
                            field: field.name.clone(),
                        })
                    }
                    KeyStrategy::Assigned => Value::Null,
                }
            } else {
                value
            };
            check_field(&descriptor, &field.name, &value)?;
            if value.is_null() && !field.nullable && validate_required && field.name != descriptor.primary_key {
                return Err(CoreError::MissingRequiredField {
                    type_name: descriptor.name.clone(),
                    field: field.name.clone(),
                });
            }
            values.fields.insert(field.name.clone(), value);
        }
        for relationship in descriptor.owning_relationships() {
            let reference = match initial.get(&relationship.name) {
                Some(Value::Null) | None => Reference::None,
                Some(key) => Reference::Key(key.clone()),
            };
            values.references.insert(relationship.name.clone(), reference);
        }
        Ok(Self::from_values(descriptor, values))
    }

    /// Builds an instance from a stored row.
    ///
    /// Columns the descriptor does not know are ignored.
    pub(crate) fn hydrate(descriptor: Arc<EntityDescriptor>, row: &Row) -> Self {
        let mut values = EntityValues::default();
        for field in &descriptor.fields {
            let value = row.get(&field.name).cloned().unwrap_or_default();
            values.fields.insert(field.name.clone(), value);
        }
        for relationship in descriptor.owning_relationships() {
            let key = relationship
                .column()
                .and_then(|column| row.get(column))
                .cloned()
                .unwrap_or_default();
            let reference = if key.is_null() {
                Reference::None
            } else {
                Reference::Key(key)
            };
            values.references.insert(relationship.name.clone(), reference);
        }
        Self::from_values(descriptor, values)
    }

    /// Entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.inner.descriptor.name
    }

    /// Descriptor of the entity type.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.inner.descriptor
    }

    /// Current primary key, `Null` while unassigned.
    #[must_use]
    pub fn primary_key(&self) -> Value {
        self.inner
            .values
            .read()
            .fields
            .get(&self.inner.descriptor.primary_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Reads a scalar field.
    pub fn get(&self, field: &str) -> CoreResult<Value> {
        self.inner
            .values
            .read()
            .fields
            .get(field)
            .cloned()
            .ok_or_else(|| CoreError::UnknownField {
                type_name: self.entity_type().to_string(),
                field: field.to_string(),
            })
    }

    /// Writes a scalar field.
    ///
    /// The value must match the field type and nullability.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        let descriptor = &self.inner.descriptor;
        let Some(field_descriptor) = descriptor.get_field(field) else {
            return Err(CoreError::UnknownField {
                type_name: descriptor.name.clone(),
                field: field.to_string(),
            });
        };
        check_field(descriptor, field, &value)?;
        if value.is_null() && !field_descriptor.nullable {
            return Err(CoreError::invalid_value(&descriptor.name, field, "field is not nullable"));
        }
        self.inner.values.write().fields.insert(field.to_string(), value);
        Ok(())
    }

    /// Reads an owning relationship.
    ///
    /// Inverse sides hold nothing on the entity; resolve them through the
    /// entity manager.
    pub fn reference(&self, relation: &str) -> CoreResult<Reference> {
        self.owning(relation)?;
        Ok(self
            .inner
            .values
            .read()
            .references
            .get(relation)
            .cloned()
            .unwrap_or_default())
    }

    /// Points an owning relationship at `target`.
    pub fn set_reference(&self, relation: &str, target: &Entity) -> CoreResult<()> {
        let relationship = self.owning(relation)?;
        if relationship.target != target.entity_type() {
            return Err(CoreError::invalid_value(
                self.entity_type(),
                relation,
                format!("expected {}, got {}", relationship.target, target.entity_type()),
            ));
        }
        self.store_reference(relation, Reference::Entity(target.clone()));
        Ok(())
    }

    /// Points an owning relationship at a key without loading the target.
    pub fn set_reference_key(&self, relation: &str, key: impl Into<Value>) -> CoreResult<()> {
        let key = key.into();
        if key.is_null() {
            return self.unset_reference(relation);
        }
        self.owning(relation)?;
        self.store_reference(relation, Reference::Key(key));
        Ok(())
    }

    /// Clears a nullable owning relationship.
    pub fn unset_reference(&self, relation: &str) -> CoreResult<()> {
        let relationship = self.owning(relation)?;
        if !relationship.nullable {
            return Err(CoreError::invalid_value(
                self.entity_type(),
                relation,
                "relation is not nullable",
            ));
        }
        self.store_reference(relation, Reference::None);
        Ok(())
    }

    /// Returns true if both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the shared allocation, stable for the instance lifetime.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Returns true if `relation` currently points at `target`.
    pub(crate) fn refers_to(&self, relation: &str, target: &Entity) -> bool {
        match self.reference(relation) {
            Ok(Reference::Entity(entity)) => entity.ptr_eq(target),
            Ok(Reference::Key(key)) => key == target.primary_key(),
            _ => false,
        }
    }

    /// Persisted columns of the current state.
    ///
    /// Owning relationships contribute their foreign key scalar under the
    /// join column, never the related instance.
    pub(crate) fn column_values(&self) -> Row {
        let (mut row, references) = {
            let values = self.inner.values.read();
            let row: Row = values
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            (row, values.references.clone())
        };
        for relationship in self.inner.descriptor.owning_relationships() {
            if let Some(column) = relationship.column() {
                let key = references
                    .get(&relationship.name)
                    .map(Reference::key)
                    .unwrap_or_default();
                row.insert(column, key);
            }
        }
        row
    }

    /// Current value of every owning relationship with its join column.
    pub(crate) fn owning_references(&self) -> Vec<OwningReference> {
        let references = self.inner.values.read().references.clone();
        self.inner
            .descriptor
            .owning_relationships()
            .filter_map(|relationship| {
                Some(OwningReference {
                    column: relationship.column()?.to_string(),
                    nullable: relationship.nullable,
                    target_type: relationship.target.clone(),
                    reference: references.get(&relationship.name).cloned().unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Swaps an unresolved key for the loaded instance with that key.
    ///
    /// The foreign key scalar is unchanged, so no diff can result.
    pub(crate) fn bind_reference(&self, relation: &str, target: &Entity) {
        let target_key = target.primary_key();
        let mut values = self.inner.values.write();
        if let Some(reference) = values.references.get_mut(relation) {
            if matches!(reference, Reference::Key(key) if *key == target_key) {
                *reference = Reference::Entity(target.clone());
            }
        }
    }

    /// Writes store-generated values without validation.
    pub(crate) fn apply_generated(&self, generated: &Row) {
        let mut values = self.inner.values.write();
        for (column, value) in generated.iter() {
            if let Some(slot) = values.fields.get_mut(column) {
                *slot = value.clone();
            }
        }
    }

    fn owning(&self, relation: &str) -> CoreResult<&RelationshipDescriptor> {
        let relationship = self.inner.descriptor.require_relationship(relation)?;
        if !relationship.owning {
            return Err(CoreError::invalid_operation(format!(
                "{}.{} is an inverse relation; resolve it through the entity manager",
                self.entity_type(),
                relation
            )));
        }
        Ok(relationship)
    }

    fn store_reference(&self, relation: &str, reference: Reference) {
        self.inner
            .values
            .write()
            .references
            .insert(relation.to_string(), reference);
    }
}

fn check_field(descriptor: &EntityDescriptor, field: &str, value: &Value) -> CoreResult<()> {
    match descriptor.get_field(field) {
        Some(f) if f.field_type.accepts(value) => Ok(()),
        Some(f) => Err(CoreError::invalid_value(
            &descriptor.name,
            field,
            format!("expected {}, got {}", f.field_type, value.type_name()),
        )),
        None => Err(CoreError::UnknownField {
            type_name: descriptor.name.clone(),
            field: field.to_string(),
        }),
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.inner.values.read();
        f.debug_struct("Entity")
            .field("type", &self.inner.descriptor.name)
            .field("fields", &values.fields)
            .field("references", &values.references)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldDescriptor, RelationshipDescriptor};

    fn user() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::new("user", "id")
                .field(FieldDescriptor::text("name").default_value("Default"))
                .field(FieldDescriptor::integer("balance").default_value(0))
                .relationship(RelationshipDescriptor::one_to_one("blog", "blog").mapped_by("author")),
        )
    }

    fn blog() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::new("blog", "id")
                .field(FieldDescriptor::text("title").nullable(true))
                .relationship(RelationshipDescriptor::one_to_one("author", "user")),
        )
    }

    #[test]
    fn build_applies_defaults() {
        let user = Entity::build(user(), &Row::new().with("id", 1), true).unwrap();
        assert_eq!(user.get("name").unwrap(), Value::from("Default"));
        assert_eq!(user.get("balance").unwrap(), Value::Integer(0));
        assert_eq!(user.primary_key(), Value::Integer(1));
    }

    #[test]
    fn build_requires_assigned_key() {
        let result = Entity::build(user(), &Row::new(), true);
        assert!(matches!(result, Err(CoreError::MissingRequiredField { .. })));
    }

    #[test]
    fn build_rejects_unknown_field() {
        let result = Entity::build(user(), &Row::new().with("id", 1).with("age", 3), true);
        assert!(matches!(result, Err(CoreError::UnknownField { .. })));
    }

    #[test]
    fn set_checks_type_and_nullability() {
        let user = Entity::build(user(), &Row::new().with("id", 1), true).unwrap();
        assert!(matches!(
            user.set("balance", "lots"),
            Err(CoreError::InvalidValue { .. })
        ));
        assert!(user.set("name", Value::Null).is_err());
        user.set("balance", 10).unwrap();
        assert_eq!(user.get("balance").unwrap(), Value::Integer(10));
    }

    #[test]
    fn column_values_use_foreign_key_scalars() {
        let user = Entity::build(user(), &Row::new().with("id", 7), true).unwrap();
        let blog = Entity::build(blog(), &Row::new().with("id", 1), true).unwrap();
        assert_eq!(blog.column_values().get("author_id"), Some(&Value::Null));

        blog.set_reference("author", &user).unwrap();
        assert_eq!(blog.column_values().get("author_id"), Some(&Value::Integer(7)));
        assert!(blog.refers_to("author", &user));
    }

    #[test]
    fn binding_a_reference_keeps_column_values() {
        let user = Entity::build(user(), &Row::new().with("id", 7), true).unwrap();
        let blog = Entity::hydrate(blog(), &Row::new().with("id", 1).with("author_id", 7));
        let before = blog.column_values();

        blog.bind_reference("author", &user);
        assert!(blog.reference("author").unwrap().entity().is_some());
        assert_eq!(blog.column_values(), before);
    }

    #[test]
    fn inverse_relation_not_readable_on_entity() {
        let user = Entity::build(user(), &Row::new().with("id", 1), true).unwrap();
        assert!(matches!(
            user.reference("blog"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn wrong_target_type_rejected() {
        let blog_a = Entity::build(blog(), &Row::new().with("id", 1), true).unwrap();
        let blog_b = Entity::build(blog(), &Row::new().with("id", 2), true).unwrap();
        assert!(blog_a.set_reference("author", &blog_b).is_err());
    }

    #[test]
    fn clones_share_identity() {
        let user = Entity::build(user(), &Row::new().with("id", 1), true).unwrap();
        let alias = user.clone();
        alias.set("balance", 5).unwrap();
        assert!(user.ptr_eq(&alias));
        assert_eq!(user.get("balance").unwrap(), Value::Integer(5));
    }
}
