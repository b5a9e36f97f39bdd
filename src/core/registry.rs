//! Tables and migrations registered before bootstrap

use super::migration::Migration;
use super::schema::TableDescriptor;

/// Append-only list of table descriptors and migrations
///
/// Feature modules add to a registry during startup; the bootstrapper then
/// synchronizes its tables and runs its migrations in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tables: Vec<TableDescriptor>,
    migrations: Vec<Migration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register table descriptors
    pub fn add_tables<I>(&mut self, tables: I) -> &mut Self
    where
        I: IntoIterator<Item = TableDescriptor>,
    {
        self.tables.extend(tables);
        self
    }

    /// Register migrations, to run after every previously registered one
    pub fn add_migrations<I>(&mut self, migrations: I) -> &mut Self
    where
        I: IntoIterator<Item = Migration>,
    {
        self.migrations.extend(migrations);
        self
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnDescriptor, ColumnType};

    #[test]
    fn test_append_keeps_order() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());

        registry
            .add_tables([TableDescriptor::new("User")
                .column(ColumnDescriptor::new("ID", ColumnType::BigInt).primary_key())])
            .add_migrations([Migration::sql("first", "SELECT 1")]);
        registry.add_migrations([
            Migration::sql("second", "SELECT 1"),
            Migration::sql("third", "SELECT 1"),
        ]);

        assert_eq!(registry.tables().len(), 1);
        let ids: Vec<&str> = registry.migrations().iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }
}
