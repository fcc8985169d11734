//! Entity, field and relationship descriptors.

use crate::error::{CoreError, CoreResult};
use entimap_codec::Value;
use std::collections::HashSet;
use std::fmt;

/// Semantic type of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 64-bit signed integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Boolean.
    Bool,
    /// Raw bytes.
    Bytes,
}

impl FieldType {
    /// Returns true if `value` may be stored in a field of this type.
    ///
    /// `Null` is accepted by every type; nullability is checked separately.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Integer, Value::Integer(_))
                | (Self::Text, Value::Text(_))
                | (Self::Bool, Value::Bool(_))
                | (Self::Bytes, Value::Bytes(_))
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Bool => "bool",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// A scalar field of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name, also the column name.
    pub name: String,
    /// Semantic type.
    pub field_type: FieldType,
    /// Declared default, applied by `create` when no value is given.
    pub default: Option<Value>,
    /// Whether the field accepts `Null`.
    pub nullable: bool,
}

impl FieldDescriptor {
    /// Creates a non-nullable field without default.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: None,
            nullable: false,
        }
    }

    /// Shorthand for an integer field.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// Shorthand for a text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    /// Shorthand for a boolean field.
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }

    /// Shorthand for a bytes field.
    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bytes)
    }

    /// Sets nullability.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// One row on each side.
    OneToOne,
    /// Inverse side of a many-to-one.
    OneToMany,
    /// Owning side holding the foreign key towards a single target.
    ManyToOne,
}

/// A relationship of an entity type.
///
/// Only the owning side stores a foreign key (its join column). The inverse
/// side is derived from the owning side of the target type and never
/// persisted or snapshotted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    /// Relation name.
    pub name: String,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Whether this side stores the foreign key.
    pub owning: bool,
    /// Target entity type.
    pub target: String,
    /// Name of the relation on the other side, if declared.
    ///
    /// Required on the inverse side, where it names the owning relation.
    pub inverse: Option<String>,
    /// Foreign key column of an owning relation.
    pub join_column: Option<String>,
    /// Whether the foreign key accepts `Null`.
    pub nullable: bool,
}

impl RelationshipDescriptor {
    fn owning(name: String, target: String, cardinality: Cardinality) -> Self {
        let join_column = format!("{name}_id");
        Self {
            name,
            cardinality,
            owning: true,
            target,
            inverse: None,
            join_column: Some(join_column),
            nullable: false,
        }
    }

    /// Owning one-to-one with join column `<name>_id`.
    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::owning(name.into(), target.into(), Cardinality::OneToOne)
    }

    /// Owning many-to-one with join column `<name>_id`.
    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::owning(name.into(), target.into(), Cardinality::ManyToOne)
    }

    /// Inverse one-to-many, derived from `mapped_by` on the target.
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality: Cardinality::OneToMany,
            owning: false,
            target: target.into(),
            inverse: Some(mapped_by.into()),
            join_column: None,
            nullable: true,
        }
    }

    /// Turns this relation into the inverse side of `field` on the target.
    #[must_use]
    pub fn mapped_by(mut self, field: impl Into<String>) -> Self {
        self.owning = false;
        self.inverse = Some(field.into());
        self.join_column = None;
        self.nullable = true;
        self
    }

    /// Records the name of the inverse relation on the target.
    #[must_use]
    pub fn inversed_by(mut self, field: impl Into<String>) -> Self {
        self.inverse = Some(field.into());
        self
    }

    /// Overrides the join column.
    #[must_use]
    pub fn join_column(mut self, column: impl Into<String>) -> Self {
        self.join_column = Some(column.into());
        self
    }

    /// Sets nullability of the foreign key.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Foreign key column, present only on the owning side.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        if self.owning {
            self.join_column.as_deref()
        } else {
            None
        }
    }
}

/// How primary keys of an entity type are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// The caller sets the key before flushing.
    #[default]
    Assigned,
    /// The store generates an integer key on insert.
    AutoIncrement,
    /// `create` assigns a random UUID (as text) when none is given.
    Uuid,
}

/// Static description of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Type name, also the table name.
    pub name: String,
    /// Name of the primary key field.
    pub primary_key: String,
    /// Key assignment strategy.
    pub key_strategy: KeyStrategy,
    /// Scalar fields in declaration order, including the primary key.
    pub fields: Vec<FieldDescriptor>,
    /// Relationships in declaration order.
    pub relationships: Vec<RelationshipDescriptor>,
}

impl EntityDescriptor {
    /// Creates a descriptor with an integer primary key field.
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let primary_key = primary_key.into();
        Self {
            name: name.into(),
            fields: vec![FieldDescriptor::integer(primary_key.clone())],
            primary_key,
            key_strategy: KeyStrategy::Assigned,
            relationships: Vec::new(),
        }
    }

    /// Sets the key strategy.
    ///
    /// `Uuid` switches the primary key field to text.
    #[must_use]
    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        if strategy == KeyStrategy::Uuid {
            let primary_key = self.primary_key.clone();
            if let Some(field) = self.fields.iter_mut().find(|f| f.name == primary_key) {
                field.field_type = FieldType::Text;
            }
        }
        self
    }

    /// Adds a field, replacing one with the same name.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Looks up a field.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a relationship.
    #[must_use]
    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Looks up a relationship, failing with `UnknownRelation`.
    pub(crate) fn require_relationship(&self, name: &str) -> CoreResult<&RelationshipDescriptor> {
        self.get_relationship(name)
            .ok_or_else(|| CoreError::UnknownRelation {
                type_name: self.name.clone(),
                relation: name.to_string(),
            })
    }

    /// Relationships that store a foreign key.
    pub fn owning_relationships(&self) -> impl Iterator<Item = &RelationshipDescriptor> {
        self.relationships.iter().filter(|r| r.owning)
    }

    /// Persisted columns: scalar fields, then join columns.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.owning_relationships().filter_map(|r| r.column()))
    }

    /// Checks the descriptor in isolation.
    ///
    /// Cross-type checks (relationship targets) happen in the registry.
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |message: String| Err(CoreError::invalid_descriptor(&self.name, message));

        let Some(key) = self.get_field(&self.primary_key) else {
            return invalid(format!("primary key {} is not a field", self.primary_key));
        };
        if key.nullable {
            return invalid("primary key cannot be nullable".into());
        }
        match (self.key_strategy, key.field_type) {
            (KeyStrategy::AutoIncrement, t) if t != FieldType::Integer => {
                return invalid("auto-increment keys must be integers".into())
            }
            (KeyStrategy::Uuid, t) if t != FieldType::Text => {
                return invalid("uuid keys must be text".into())
            }
            _ => {}
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return invalid(format!("duplicate field {}", field.name));
            }
            if let Some(default) = &field.default {
                if !field.field_type.accepts(default) || (default.is_null() && !field.nullable) {
                    return invalid(format!(
                        "default {default} does not fit {} field {}",
                        field.field_type, field.name
                    ));
                }
            }
        }
        for relationship in &self.relationships {
            if !names.insert(relationship.name.as_str()) {
                return invalid(format!("duplicate member {}", relationship.name));
            }
            match (relationship.cardinality, relationship.owning) {
                (Cardinality::OneToMany, true) => {
                    return invalid(format!("one-to-many {} must be inverse", relationship.name))
                }
                (Cardinality::ManyToOne, false) => {
                    return invalid(format!("many-to-one {} must be owning", relationship.name))
                }
                _ => {}
            }
            if relationship.owning && relationship.join_column.is_none() {
                return invalid(format!("owning relation {} has no join column", relationship.name));
            }
            if !relationship.owning && relationship.inverse.is_none() {
                return invalid(format!("inverse relation {} needs mapped_by", relationship.name));
            }
        }
        let mut columns = HashSet::new();
        for column in self.columns() {
            if !columns.insert(column) {
                return invalid(format!("column {column} is declared twice"));
            }
        }
        Ok(())
    }
}
