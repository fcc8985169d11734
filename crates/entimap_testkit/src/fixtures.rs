//! Test fixtures and session helpers.
//!
//! The user/blog schema: a user owns nothing and sees its blog through an
//! inverse one-to-one; a blog owns the foreign key `author_id`.

use entimap_codec::Row;
use entimap_core::{
    Config, Entity, EntityDescriptor, EntityManager, FieldDescriptor, KeyStrategy,
    MetadataRegistry, RelationshipDescriptor,
};
use entimap_store::InMemoryStore;
use std::sync::Arc;

/// `user { id, name = 'Default', balance = 0, blog (inverse) }`.
pub fn user_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("user", "id")
        .field(FieldDescriptor::text("name").default_value("Default"))
        .field(FieldDescriptor::integer("balance").default_value(0))
        .relationship(RelationshipDescriptor::one_to_one("blog", "blog").mapped_by("author"))
}

/// `blog { id, title (nullable), author -> user }`.
pub fn blog_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("blog", "id")
        .field(FieldDescriptor::text("title").nullable(true))
        .relationship(RelationshipDescriptor::one_to_one("author", "user").inversed_by("blog"))
}

/// `author { id (auto), name, posts (inverse one-to-many) }`.
pub fn author_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("author", "id")
        .key_strategy(KeyStrategy::AutoIncrement)
        .field(FieldDescriptor::text("name"))
        .relationship(RelationshipDescriptor::one_to_many("posts", "post", "author"))
}

/// `post { id (auto), title, author -> author }`.
pub fn post_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("post", "id")
        .key_strategy(KeyStrategy::AutoIncrement)
        .field(FieldDescriptor::text("title"))
        .relationship(RelationshipDescriptor::many_to_one("author", "author"))
}

/// Registry with the user/blog schema.
pub fn blog_registry() -> Arc<MetadataRegistry> {
    registry_of([user_descriptor(), blog_descriptor()])
}

/// Registry with the author/post schema.
pub fn post_registry() -> Arc<MetadataRegistry> {
    registry_of([author_descriptor(), post_descriptor()])
}

/// Registry from descriptors.
///
/// # Panics
///
/// Panics if a descriptor is rejected.
pub fn registry_of(descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Arc<MetadataRegistry> {
    let mut registry = MetadataRegistry::new();
    for descriptor in descriptors {
        registry
            .register(descriptor)
            .expect("Failed to register descriptor");
    }
    Arc::new(registry)
}

/// Store with a table for every registered type.
///
/// # Panics
///
/// Panics if a table cannot be created.
pub fn store_for(registry: &MetadataRegistry) -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .create_tables(registry.table_schemas())
        .expect("Failed to create tables");
    store
}

/// An entity manager over an in-memory store.
pub struct TestSession {
    /// The entity manager.
    pub em: EntityManager<InMemoryStore>,
}

impl TestSession {
    /// Session over the user/blog schema.
    pub fn blog() -> Self {
        Self::new(blog_registry(), Config::default())
    }

    /// Session over the author/post schema.
    pub fn posts() -> Self {
        Self::new(post_registry(), Config::default())
    }

    /// Session with a custom registry and configuration.
    ///
    /// # Panics
    ///
    /// Panics if the registry is inconsistent.
    pub fn new(registry: Arc<MetadataRegistry>, config: Config) -> Self {
        let store = store_for(&registry);
        Self::over(registry, store, config)
    }

    /// Session over an existing store handle.
    ///
    /// # Panics
    ///
    /// Panics if the registry is inconsistent.
    pub fn over(registry: Arc<MetadataRegistry>, store: InMemoryStore, config: Config) -> Self {
        Self {
            em: EntityManager::with_config(registry, store, config)
                .expect("Failed to open entity manager"),
        }
    }

    /// Another session sharing this session's committed data.
    pub fn sibling(&self) -> Self {
        Self::over(
            Arc::clone(self.em.registry()),
            self.em.store().clone(),
            self.em.unit_of_work().config().clone(),
        )
    }
}

impl std::ops::Deref for TestSession {
    type Target = EntityManager<InMemoryStore>;

    fn deref(&self) -> &Self::Target {
        &self.em
    }
}

impl std::ops::DerefMut for TestSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.em
    }
}

/// Creates `user#1 { name: 'Some User', balance: 5000 }` and
/// `blog#1 { title: 'Test Blog', author: user#1 }`.
///
/// # Panics
///
/// Panics if either entity cannot be created.
pub fn seed_user_and_blog(em: &mut EntityManager<InMemoryStore>) -> (Entity, Entity) {
    let user = em
        .create(
            "user",
            Row::new()
                .with("id", 1)
                .with("name", "Some User")
                .with("balance", 5000),
        )
        .expect("Failed to create user");
    let blog = em
        .create("blog", Row::new().with("id", 1).with("title", "Test Blog"))
        .expect("Failed to create blog");
    blog.set_reference("author", &user)
        .expect("Failed to set author");
    (user, blog)
}

/// Seeds the user/blog pair, flushes and clears the session.
///
/// # Panics
///
/// Panics if the flush fails.
pub fn seeded_blog_session() -> TestSession {
    let mut session = TestSession::blog();
    seed_user_and_blog(&mut session);
    session.flush().expect("Failed to flush seed data");
    session.clear();
    session.store().clear_statements();
    session
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registries_are_consistent() {
        assert!(blog_registry().validate().is_ok());
        assert!(post_registry().validate().is_ok());
    }

    #[test]
    fn seeded_session_starts_clean() {
        let session = seeded_blog_session();
        assert!(session.store().statements().is_empty());
        assert_eq!(session.store().row_count("user").unwrap(), 1);
        assert_eq!(session.store().row_count("blog").unwrap(), 1);
        assert!(session.unit_of_work().identity_map().is_empty());
    }
}
