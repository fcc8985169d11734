//! Unit-of-work configuration.

/// Configuration for an entity manager.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether `create` rejects non-nullable fields left without a value
    /// and without a default.
    pub validate_required: bool,

    /// Whether untracked entities reachable through an owning reference of
    /// a tracked entity are registered as new before a flush.
    pub cascade_persist: bool,

    /// Whether hydration binds owning references to instances already in
    /// the identity map instead of leaving an unresolved key.
    pub hydrate_known_references: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            validate_required: true,
            cascade_persist: true,
            hydrate_known_references: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether required fields are validated on create.
    #[must_use]
    pub const fn validate_required(mut self, value: bool) -> Self {
        self.validate_required = value;
        self
    }

    /// Sets whether referenced entities are persisted by cascade.
    #[must_use]
    pub const fn cascade_persist(mut self, value: bool) -> Self {
        self.cascade_persist = value;
        self
    }

    /// Sets whether hydration binds references to known instances.
    #[must_use]
    pub const fn hydrate_known_references(mut self, value: bool) -> Self {
        self.hydrate_known_references = value;
        self
    }
}
