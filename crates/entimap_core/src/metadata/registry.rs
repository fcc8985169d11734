//! Registry of entity type descriptors.

use super::descriptor::{Cardinality, EntityDescriptor, KeyStrategy};
use crate::error::{CoreError, CoreResult};
use entimap_store::{ColumnSchema, KeyGeneration, TableSchema};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of entity types.
///
/// Populated during bootstrap, then shared behind an `Arc` by every entity
/// manager built from it. There is no way to mutate a registry through a
/// shared reference, so concurrent reads are always safe.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    types: BTreeMap<String, Arc<EntityDescriptor>>,
}

impl MetadataRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateType` if the name is taken, or `InvalidDescriptor`
    /// if the descriptor is inconsistent on its own.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> CoreResult<()> {
        if self.types.contains_key(&descriptor.name) {
            return Err(CoreError::DuplicateType {
                type_name: descriptor.name,
            });
        }
        descriptor.validate()?;
        self.types
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, descriptor: EntityDescriptor) -> CoreResult<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Returns the descriptor of a type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the type is not registered.
    pub fn describe(&self, type_name: &str) -> CoreResult<Arc<EntityDescriptor>> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_type(type_name))
    }

    /// Returns true if the type is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterates descriptors by type name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.types.values()
    }

    /// Checks relationships across types.
    ///
    /// Every target must be registered, and every inverse side must name
    /// an owning relation on its target that points back at this type.
    pub fn validate(&self) -> CoreResult<()> {
        for descriptor in self.types.values() {
            for relationship in &descriptor.relationships {
                let target = self.types.get(&relationship.target).ok_or_else(|| {
                    CoreError::invalid_descriptor(
                        &descriptor.name,
                        format!(
                            "relation {} targets unknown type {}",
                            relationship.name, relationship.target
                        ),
                    )
                })?;
                if relationship.owning {
                    continue;
                }
                let mapped_by = relationship.inverse.as_deref().unwrap_or_default();
                let owner = target.get_relationship(mapped_by).filter(|owner| {
                    owner.owning && owner.target == descriptor.name
                });
                let Some(owner) = owner else {
                    return Err(CoreError::invalid_descriptor(
                        &descriptor.name,
                        format!(
                            "relation {} is mapped by {}.{}, which is not an owning relation to {}",
                            relationship.name, target.name, mapped_by, descriptor.name
                        ),
                    ));
                };
                let expected = match relationship.cardinality {
                    Cardinality::OneToMany => Cardinality::ManyToOne,
                    other => other,
                };
                if owner.cardinality != expected {
                    return Err(CoreError::invalid_descriptor(
                        &descriptor.name,
                        format!(
                            "relation {} does not match the cardinality of {}.{}",
                            relationship.name, target.name, mapped_by
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Derives store table schemas from the registered types.
    ///
    /// Join columns become foreign keys to the target table; field defaults
    /// become column defaults.
    #[must_use]
    pub fn table_schemas(&self) -> Vec<TableSchema> {
        self.types
            .values()
            .map(|descriptor| {
                let key_generation = match descriptor.key_strategy {
                    KeyStrategy::AutoIncrement => KeyGeneration::AutoIncrement,
                    KeyStrategy::Assigned | KeyStrategy::Uuid => KeyGeneration::Assigned,
                };
                let mut schema = TableSchema::new(&descriptor.name, &descriptor.primary_key)
                    .key_generation(key_generation);
                for field in &descriptor.fields {
                    if field.name == descriptor.primary_key {
                        continue;
                    }
                    let mut column = ColumnSchema::new(&field.name).nullable(field.nullable);
                    if let Some(default) = &field.default {
                        column = column.default_value(default.clone());
                    }
                    schema = schema.column(column);
                }
                for relationship in descriptor.owning_relationships() {
                    if let Some(join_column) = relationship.column() {
                        schema = schema.column(
                            ColumnSchema::new(join_column)
                                .nullable(relationship.nullable)
                                .references(&relationship.target),
                        );
                    }
                }
                schema
            })
            .collect()
    }
}
