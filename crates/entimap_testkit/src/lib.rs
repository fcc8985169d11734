//! # Entimap Testkit
//!
//! Test utilities for entimap.
//!
//! This crate provides:
//! - Fixtures for the user/blog schema and ready-made sessions
//! - A fault-injecting store wrapper
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use entimap_testkit::prelude::*;
//!
//! let mut session = TestSession::blog();
//! let (user, blog) = seed_user_and_blog(&mut session);
//! session.flush().unwrap();
//! assert_eq!(session.store().writes().len(), 2);
//! # let _ = (user, blog);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod failing;
pub mod fixtures;
pub mod generators;
mod logging;

pub use logging::init_tracing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::failing::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use entimap_codec::{Row, Value};
    pub use entimap_core::{
        ChangeKind, Config, CoreError, Entity, EntityManager, EntityState, Reference,
    };
    pub use entimap_store::{InMemoryStore, Statement, Store, StoreError};
}

pub use failing::*;
pub use fixtures::*;
pub use generators::*;
