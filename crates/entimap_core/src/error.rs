//! Error types for entimap core.

use entimap_codec::Value;
use entimap_store::StoreError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in unit-of-work operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Entity type is not registered.
    #[error("unknown entity type: {type_name}")]
    UnknownType {
        /// The requested type name.
        type_name: String,
    },

    /// Entity type was registered twice.
    #[error("entity type already registered: {type_name}")]
    DuplicateType {
        /// The duplicated type name.
        type_name: String,
    },

    /// No row exists for the requested key.
    #[error("{type_name} with key {key} not found")]
    NotFound {
        /// Entity type searched.
        type_name: String,
        /// Primary key searched.
        key: Value,
    },

    /// A managed entity has no snapshot to diff against.
    #[error("managed {type_name} {key} has no snapshot")]
    MissingSnapshot {
        /// Entity type of the record.
        type_name: String,
        /// Primary key of the record.
        key: Value,
    },

    /// Inserts form a cycle made only of non-nullable foreign keys.
    #[error("unresolvable dependency cycle between {}", cycle.join(", "))]
    UnresolvableDependency {
        /// Entities left in the cycle, as `type#key`.
        cycle: Vec<String>,
    },

    /// Store collaborator failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Field is not declared on the entity type.
    #[error("unknown field {field} on {type_name}")]
    UnknownField {
        /// Entity type.
        type_name: String,
        /// Field name.
        field: String,
    },

    /// Relationship is not declared on the entity type.
    #[error("unknown relation {relation} on {type_name}")]
    UnknownRelation {
        /// Entity type.
        type_name: String,
        /// Relation name.
        relation: String,
    },

    /// Value does not fit the field.
    #[error("invalid value for {type_name}.{field}: {message}")]
    InvalidValue {
        /// Entity type.
        type_name: String,
        /// Field or relation name.
        field: String,
        /// What is wrong with the value.
        message: String,
    },

    /// Non-nullable field without value or default.
    #[error("missing required field {field} on {type_name}")]
    MissingRequiredField {
        /// Entity type.
        type_name: String,
        /// Field name.
        field: String,
    },

    /// Entity type descriptor is inconsistent.
    #[error("invalid descriptor for {type_name}: {message}")]
    InvalidDescriptor {
        /// Entity type.
        type_name: String,
        /// Description of the problem.
        message: String,
    },

    /// Operation not allowed in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the misuse.
        message: String,
    },
}

impl CoreError {
    /// Creates an unknown type error.
    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            type_name: type_name.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(type_name: impl Into<String>, key: Value) -> Self {
        Self::NotFound {
            type_name: type_name.into(),
            key,
        }
    }

    /// Creates an invalid descriptor error.
    pub fn invalid_descriptor(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(
        type_name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            type_name: type_name.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error came from the store collaborator.
    #[must_use]
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
