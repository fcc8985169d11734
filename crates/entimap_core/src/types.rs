//! Core type definitions for entimap.

use std::fmt;
use uuid::Uuid;

/// Identifier of a unit of work.
///
/// Recorded on every flush event so interleaved sessions sharing one store
/// can be told apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitOfWorkId(Uuid);

impl UnitOfWorkId {
    /// Creates a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UnitOfWorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitOfWorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uow:{}", self.0)
    }
}

/// Position of a record in the identity map.
///
/// Record IDs are monotonically increasing within a unit of work, so
/// ordering by ID is registration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}", self.0)
    }
}

/// Lifecycle state of an entity relative to a unit of work.
///
/// ```text
/// create ──▶ New ──insert flush──▶ Managed ◀── load
///                                    │
///                                 remove
///                                    ▼
///                                 Removed ──delete flush──▶ (purged)
///
/// clear: any state ──▶ Detached
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Created in memory, not yet inserted.
    New,
    /// Backed by a row, tracked against a snapshot.
    Managed,
    /// Scheduled for deletion on the next flush.
    Removed,
    /// Not tracked by the unit of work.
    Detached,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Managed => "managed",
            Self::Removed => "removed",
            Self::Detached => "detached",
        };
        f.write_str(name)
    }
}
