//! Ordered, recorded migrations
//!
//! Migrations run in registration order. Each applied migration's id is
//! recorded in the `migrations` table, so a later run skips it.
//!
//! # Example
//!
//! ```ignore
//! use rust_db_bootstrap::core::{Migration, MigrationAction, Migrator};
//!
//! let migrations = vec![
//!     Migration::sql("20240101_create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY)")
//!         .with_rollback(MigrationAction::sql("DROP TABLE users")),
//!     Migration::new(
//!         "20240102_seed_admin",
//!         MigrationAction::func(|engine| {
//!             Box::pin(async move {
//!                 engine.exec("INSERT INTO users (id) VALUES (1)", &[]).await?;
//!                 Ok(())
//!             })
//!         }),
//!     ),
//! ];
//!
//! Migrator::new(&engine, &migrations).migrate().await?;
//! ```

use super::dialect::Dialect;
use super::engine::Engine;
use super::error::{DatabaseError, Result};
use super::schema::{ColumnDescriptor, ColumnType};
use super::value::DatabaseValue;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

/// Default name of the table recording applied migrations
pub const MIGRATIONS_TABLE: &str = "migrations";
const ID_COLUMN: &str = "id";

/// Future returned by a function migration
pub type MigrationFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

type MigrationFn = Arc<dyn for<'a> Fn(&'a Engine) -> MigrationFuture<'a> + Send + Sync>;

/// What a migration does
#[derive(Clone)]
pub enum MigrationAction {
    /// SQL script, possibly several statements
    Sql(String),
    /// Async function over the engine
    Func(MigrationFn),
}

impl MigrationAction {
    pub fn sql(sql: impl Into<String>) -> Self {
        MigrationAction::Sql(sql.into())
    }

    pub fn func<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a Engine) -> MigrationFuture<'a> + Send + Sync + 'static,
    {
        MigrationAction::Func(Arc::new(f))
    }

    async fn run(&self, engine: &Engine) -> Result<()> {
        match self {
            MigrationAction::Sql(sql) => engine.exec_batch(sql).await,
            MigrationAction::Func(f) => f(engine).await,
        }
    }
}

impl std::fmt::Debug for MigrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationAction::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            MigrationAction::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// A single forward schema or data change
#[derive(Debug, Clone)]
pub struct Migration {
    id: String,
    description: String,
    forward: MigrationAction,
    rollback: Option<MigrationAction>,
}

impl Migration {
    pub fn new(id: impl Into<String>, forward: MigrationAction) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            forward,
            rollback: None,
        }
    }

    /// Migration running a SQL script
    pub fn sql(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(id, MigrationAction::sql(sql))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_rollback(mut self, rollback: MigrationAction) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }
}

/// Migration status for a specific id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Migration has been applied
    Applied,
    /// Migration is pending
    Pending,
}

/// Runs a list of migrations against an engine
pub struct Migrator<'a> {
    engine: &'a Engine,
    migrations: &'a [Migration],
    table: String,
}

impl<'a> Migrator<'a> {
    pub fn new(engine: &'a Engine, migrations: &'a [Migration]) -> Self {
        Self {
            engine,
            migrations,
            table: MIGRATIONS_TABLE.to_string(),
        }
    }

    /// Record applied migrations in a different table
    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Reject empty and duplicated ids
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for migration in self.migrations {
            if migration.id.is_empty() {
                return Err(DatabaseError::migration("missing migration id"));
            }
            if !seen.insert(migration.id.as_str()) {
                return Err(DatabaseError::migration(format!(
                    "duplicated migration id: {}",
                    migration.id
                )));
            }
        }
        Ok(())
    }

    fn dialect(&self) -> &Dialect {
        self.engine.dialect()
    }

    fn table_name(&self) -> String {
        self.dialect().table_name(self.engine.schema(), &self.table)
    }

    async fn ensure_table(&self) -> Result<()> {
        let (sql, params) = self.dialect().table_exists_query(self.engine.schema(), &self.table);
        if !self.engine.query(&sql, &params).await?.is_empty() {
            return Ok(());
        }

        let id = ColumnDescriptor::new(ID_COLUMN, ColumnType::Varchar(255)).primary_key();
        let sql = format!(
            "CREATE TABLE {} ({})",
            self.table_name(),
            self.dialect().column_definition(ID_COLUMN, &id, true)
        );
        self.engine.exec(&sql, &[]).await?;
        debug!(table = %self.table, "Created migrations table");
        Ok(())
    }

    async fn applied_ids(&self) -> Result<HashSet<String>> {
        self.ensure_table().await?;
        let sql = format!(
            "SELECT {} FROM {}",
            self.dialect().quote(ID_COLUMN),
            self.table_name()
        );
        let rows = self.engine.query(&sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(ID_COLUMN))
            .map(DatabaseValue::as_string)
            .collect())
    }

    async fn record(&self, id: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_name(),
            self.dialect().quote(ID_COLUMN),
            self.dialect().placeholder(1)
        );
        self.engine.exec(&sql, &[id.into()]).await?;
        Ok(())
    }

    async fn unrecord(&self, id: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table_name(),
            self.dialect().quote(ID_COLUMN),
            self.dialect().placeholder(1)
        );
        self.engine.exec(&sql, &[id.into()]).await?;
        Ok(())
    }

    /// Apply every pending migration in registration order
    ///
    /// Returns the ids applied by this call.
    pub async fn migrate(&self) -> Result<Vec<String>> {
        self.apply_until(None).await
    }

    /// Apply pending migrations up to and including `id`
    pub async fn migrate_to(&self, id: &str) -> Result<Vec<String>> {
        if !self.migrations.iter().any(|m| m.id == id) {
            return Err(DatabaseError::migration(format!("unknown migration id: {}", id)));
        }
        self.apply_until(Some(id)).await
    }

    async fn apply_until(&self, last: Option<&str>) -> Result<Vec<String>> {
        self.validate()?;
        if self.migrations.is_empty() {
            return Ok(Vec::new());
        }

        let applied = self.applied_ids().await.map_err(wrap)?;
        let mut ran = Vec::new();

        for migration in self.migrations {
            if !applied.contains(&migration.id) {
                info!(id = %migration.id, description = %migration.description, "Applying migration");
                migration
                    .forward
                    .run(self.engine)
                    .await
                    .map_err(|e| failed(&migration.id, e))?;
                self.record(&migration.id)
                    .await
                    .map_err(|e| failed(&migration.id, e))?;
                ran.push(migration.id.clone());
            }
            if last == Some(migration.id.as_str()) {
                break;
            }
        }

        if ran.is_empty() {
            debug!("No pending migrations");
        }
        Ok(ran)
    }

    /// Roll back the last applied migration, in registration order
    ///
    /// Returns the id rolled back, or `None` when nothing is applied.
    pub async fn rollback_last(&self) -> Result<Option<String>> {
        self.validate()?;
        let applied = self.applied_ids().await.map_err(wrap)?;

        let Some(migration) = self
            .migrations
            .iter()
            .rev()
            .find(|m| applied.contains(&m.id))
        else {
            return Ok(None);
        };

        self.roll_back(migration).await?;
        Ok(Some(migration.id.clone()))
    }

    /// Roll back applied migrations registered after `id`, newest first
    pub async fn rollback_to(&self, id: &str) -> Result<Vec<String>> {
        self.validate()?;
        let Some(position) = self.migrations.iter().position(|m| m.id == id) else {
            return Err(DatabaseError::migration(format!("unknown migration id: {}", id)));
        };
        let applied = self.applied_ids().await.map_err(wrap)?;

        let mut rolled_back = Vec::new();
        for migration in self.migrations[position + 1..].iter().rev() {
            if applied.contains(&migration.id) {
                self.roll_back(migration).await?;
                rolled_back.push(migration.id.clone());
            }
        }
        Ok(rolled_back)
    }

    async fn roll_back(&self, migration: &Migration) -> Result<()> {
        let Some(rollback) = &migration.rollback else {
            return Err(DatabaseError::migration(format!(
                "migration {} has no rollback",
                migration.id
            )));
        };
        info!(id = %migration.id, "Rolling back migration");
        rollback
            .run(self.engine)
            .await
            .map_err(|e| failed(&migration.id, e))?;
        self.unrecord(&migration.id)
            .await
            .map_err(|e| failed(&migration.id, e))
    }

    /// Status of every registered migration, in registration order
    pub async fn status(&self) -> Result<Vec<(String, MigrationStatus)>> {
        let applied = self.applied_ids().await.map_err(wrap)?;
        Ok(self
            .migrations
            .iter()
            .map(|m| {
                let status = if applied.contains(&m.id) {
                    MigrationStatus::Applied
                } else {
                    MigrationStatus::Pending
                };
                (m.id.clone(), status)
            })
            .collect())
    }

    /// Migrations not applied yet, in registration order
    pub async fn pending(&self) -> Result<Vec<&'a Migration>> {
        let applied = self.applied_ids().await.map_err(wrap)?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.id))
            .collect())
    }
}

fn failed(id: &str, source: DatabaseError) -> DatabaseError {
    DatabaseError::migration_failed(format!("{}: {}", id, source), source)
}

fn wrap(source: DatabaseError) -> DatabaseError {
    DatabaseError::migration_failed(source.to_string(), source)
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::core::engine::test_support::memory_engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_table_migration(name: &'static str) -> Migration {
        Migration::sql(name, format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", name))
            .with_rollback(MigrationAction::sql(format!("DROP TABLE {}", name)))
    }

    async fn has_table(engine: &Engine, name: &str) -> bool {
        !engine
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[name.into()],
            )
            .await
            .unwrap()
            .is_empty()
    }

    #[tokio::test]
    async fn test_migrate_in_order_once() {
        let engine = memory_engine().await;
        let migrations = vec![create_table_migration("users"), create_table_migration("posts")];
        let migrator = Migrator::new(&engine, &migrations);

        assert_eq!(migrator.migrate().await.unwrap(), vec!["users", "posts"]);
        assert!(migrator.migrate().await.unwrap().is_empty());
        assert!(has_table(&engine, "posts").await);
    }

    #[tokio::test]
    async fn test_func_migration() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let engine = memory_engine().await;
        let migrations = vec![Migration::new(
            "count_calls",
            MigrationAction::func(|_engine| {
                Box::pin(async move {
                    CALLS.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )];
        let migrator = Migrator::new(&engine, &migrations);
        migrator.migrate().await.unwrap();
        migrator.migrate().await.unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_migrate_to_and_rollback() {
        let engine = memory_engine().await;
        let migrations = vec![
            create_table_migration("a_table"),
            create_table_migration("b_table"),
            create_table_migration("c_table"),
        ];
        let migrator = Migrator::new(&engine, &migrations);

        assert_eq!(migrator.migrate_to("b_table").await.unwrap(), vec!["a_table", "b_table"]);
        let pending: Vec<&str> = migrator.pending().await.unwrap().iter().map(|m| m.id()).collect();
        assert_eq!(pending, vec!["c_table"]);

        assert_eq!(migrator.rollback_last().await.unwrap().as_deref(), Some("b_table"));
        assert!(!has_table(&engine, "b_table").await);

        let status = migrator.status().await.unwrap();
        assert_eq!(status[0], ("a_table".to_string(), MigrationStatus::Applied));
        assert_eq!(status[1], ("b_table".to_string(), MigrationStatus::Pending));

        migrator.migrate().await.unwrap();
        assert_eq!(migrator.rollback_to("a_table").await.unwrap(), vec!["c_table", "b_table"]);
    }

    #[tokio::test]
    async fn test_invalid_ids() {
        let engine = memory_engine().await;

        let migrations = vec![create_table_migration("users"), create_table_migration("users")];
        let err = Migrator::new(&engine, &migrations).migrate().await.unwrap_err();
        assert!(err.to_string().contains("duplicated migration id"));

        let migrations = vec![Migration::sql("", "SELECT 1")];
        let err = Migrator::new(&engine, &migrations).migrate().await.unwrap_err();
        assert!(matches!(err, DatabaseError::Migration { .. }));
    }

    #[tokio::test]
    async fn test_failed_migration_is_not_recorded() {
        let engine = memory_engine().await;
        let migrations = vec![
            create_table_migration("users"),
            Migration::sql("broken", "CREATE TABLE users (id INTEGER)"),
        ];
        let migrator = Migrator::new(&engine, &migrations);

        let err = migrator.migrate().await.unwrap_err();
        assert!(err.to_string().starts_with("migrate: broken"));
        assert!(matches!(err.root_cause(), DatabaseError::SqliteError(_)));

        let status = migrator.status().await.unwrap();
        assert_eq!(status[1].1, MigrationStatus::Pending);
    }
}
