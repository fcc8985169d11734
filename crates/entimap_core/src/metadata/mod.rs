//! Static description of entity types.
//!
//! Descriptors are built once during bootstrap, registered in a
//! [`MetadataRegistry`] and shared read-only afterwards.

mod descriptor;
mod registry;

pub use descriptor::{
    Cardinality, EntityDescriptor, FieldDescriptor, FieldType, KeyStrategy,
    RelationshipDescriptor,
};
pub use registry::MetadataRegistry;
