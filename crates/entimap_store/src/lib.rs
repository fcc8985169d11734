//! # Entimap Store
//!
//! The relational store collaborator the unit of work flushes into.
//!
//! A store executes single-row statements against named tables and owns
//! transaction boundaries. It knows nothing about entities, identity or
//! change tracking; those live in `entimap_core`.
//!
//! ## Design Principles
//!
//! - Statements address one row by primary key, or select by one column
//! - Inserts report the values the store generated (keys, defaults)
//! - Constraints (NOT NULL, foreign keys, unique keys) are enforced here
//! - Every executed statement is observable through a statement log
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - Transactional in-memory tables for tests and
//!   ephemeral sessions
//!
//! ## Example
//!
//! ```rust
//! use entimap_codec::Row;
//! use entimap_store::{ColumnSchema, InMemoryStore, Store, TableSchema};
//!
//! let mut store = InMemoryStore::new();
//! store
//!     .create_table(TableSchema::new("user", "id").column(ColumnSchema::new("name")))
//!     .unwrap();
//!
//! store.begin_transaction().unwrap();
//! store
//!     .execute_insert("user", &Row::new().with("id", 1).with("name", "Some User"))
//!     .unwrap();
//! store.commit().unwrap();
//!
//! assert_eq!(store.writes().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod schema;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use schema::{ColumnSchema, KeyGeneration, TableSchema};
pub use store::{Statement, Store};
