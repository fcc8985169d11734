//! Table schemas understood by the in-memory store.

use entimap_codec::Value;

/// How a table's primary key gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyGeneration {
    /// The caller supplies every key.
    #[default]
    Assigned,
    /// The store assigns increasing integers when the key is absent or NULL.
    AutoIncrement,
}

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Value used when an insert omits the column.
    pub default: Option<Value>,
    /// Table whose primary key this column references.
    pub references: Option<String>,
}

impl ColumnSchema {
    /// Creates a NOT NULL column without default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
            default: None,
            references: None,
        }
    }

    /// Sets whether NULL is accepted.
    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Sets the column default.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Declares a foreign key to another table's primary key.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>) -> Self {
        self.references = Some(table.into());
        self
    }
}

/// Description of a table: its columns and primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Primary key column name.
    pub primary_key: String,
    /// Key generation strategy.
    pub key_generation: KeyGeneration,
    /// Columns, including the primary key column.
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Creates a table with a NOT NULL primary key column.
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let primary_key = primary_key.into();
        Self {
            name: name.into(),
            columns: vec![ColumnSchema::new(primary_key.clone())],
            primary_key,
            key_generation: KeyGeneration::Assigned,
        }
    }

    /// Sets the key generation strategy.
    #[must_use]
    pub fn key_generation(mut self, key_generation: KeyGeneration) -> Self {
        self.key_generation = key_generation;
        self
    }

    /// Adds a column. A column with the primary key's name replaces it.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns that reference another table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnSchema, &str)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_deref().map(|table| (c, table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_column_is_implicit() {
        let schema = TableSchema::new("user", "id");
        assert_eq!(schema.columns.len(), 1);
        assert!(!schema.get_column("id").unwrap().nullable);
    }

    #[test]
    fn column_with_key_name_replaces_key_column() {
        let schema = TableSchema::new("user", "id").column(ColumnSchema::new("id").default_value(0));
        assert_eq!(schema.columns.len(), 1);
        assert_eq!(schema.get_column("id").unwrap().default, Some(Value::Integer(0)));
    }

    #[test]
    fn foreign_keys_lists_references() {
        let schema = TableSchema::new("blog", "id")
            .column(ColumnSchema::new("title").nullable(true))
            .column(ColumnSchema::new("author_id").references("user"));
        let fks: Vec<_> = schema.foreign_keys().map(|(c, t)| (c.name.as_str(), t)).collect();
        assert_eq!(fks, vec![("author_id", "user")]);
    }
}
