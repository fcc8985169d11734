//! # Entimap Core
//!
//! Unit-of-work change tracking for entimap.
//!
//! This crate provides:
//! - Metadata registry describing entity types and their relationships
//! - Identity map guaranteeing one instance per row
//! - Immutable snapshots and a pure dirty-check diff
//! - Change-set computation and dependency-ordered, transactional flush
//! - [`EntityManager`], the facade tying these to a store
//!
//! Dirtiness is never a flag: an entity is dirty exactly when its current
//! column values differ from its snapshot. Resolving a relationship reads
//! and binds instances but never changes a column value, so it can never
//! make an entity dirty.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod identity_map;
mod manager;
mod metadata;
mod snapshot;
mod types;
mod unit_of_work;

pub use config::Config;
pub use entity::{Entity, Reference};
pub use error::{CoreError, CoreResult};
pub use identity_map::{EntityKey, IdentityMap, ManagedRecord};
pub use manager::EntityManager;
pub use metadata::{
    Cardinality, EntityDescriptor, FieldDescriptor, FieldType, KeyStrategy, MetadataRegistry,
    RelationshipDescriptor,
};
pub use snapshot::{diff, Snapshot};
pub use types::{EntityState, RecordId, UnitOfWorkId};
pub use unit_of_work::{compute_change_sets, ChangeKind, ChangeSet, FlushReport, UnitOfWork};
