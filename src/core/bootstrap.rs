//! Engine bring-up: build, connect, synchronize tables, migrate
//!
//! [`Bootstrapper::run`] performs the sequence once and hands back a ready
//! [`Engine`]. Each step fails fast; the error names the step it came from.
//!
//! # Example
//!
//! ```no_run
//! use rust_db_bootstrap::{new_engine, Config, Registry};
//!
//! # async fn example() -> rust_db_bootstrap::Result<()> {
//! let registry = Registry::new();
//! let engine = new_engine(&Config::from_env()?, &registry).await?;
//! engine.ping().await?;
//! # Ok(())
//! # }
//! ```

use super::config::Config;
use super::database_types::DriverSupport;
use super::engine::Engine;
use super::error::{DatabaseError, Result, Stage};
use super::factory;
use super::hooks::{QueryHook, TracingHook};
use super::migration::Migrator;
use super::names::{global_init, GonicMapper};
use super::registry::Registry;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Progress of a bootstrap run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Disconnected,
    Connected,
    SchemaReady,
    Migrated,
}

impl BootstrapState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapState::Disconnected => "disconnected",
            BootstrapState::Connected => "connected",
            BootstrapState::SchemaReady => "schema-ready",
            BootstrapState::Migrated => "migrated",
        }
    }

    /// Move to `next` if it directly follows the current state
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidTransition`] for any other move
    pub fn advance(&mut self, next: BootstrapState) -> Result<()> {
        use BootstrapState::*;
        match (*self, next) {
            (Disconnected, Connected) | (Connected, SchemaReady) | (SchemaReady, Migrated) => {
                *self = next;
                Ok(())
            }
            (from, to) => Err(DatabaseError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            }),
        }
    }
}

impl std::fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot engine bring-up
pub struct Bootstrapper<'a> {
    config: &'a Config,
    registry: &'a Registry,
    support: DriverSupport,
    hooks: Vec<Arc<dyn QueryHook>>,
    state: BootstrapState,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(config: &'a Config, registry: &'a Registry) -> Self {
        Self {
            config,
            registry,
            support: DriverSupport::compiled(),
            hooks: Vec::new(),
            state: BootstrapState::Disconnected,
        }
    }

    /// Attach a hook to the engine before it connects
    pub fn with_hook(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Override the set of usable drivers
    pub fn with_support(mut self, support: DriverSupport) -> Self {
        self.support = support;
        self
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Run the bring-up sequence
    ///
    /// 1. register the bootstrap initialisms
    /// 2. build the engine (connection string, pool)
    /// 3. set the name mapper, verbose SQL and hooks
    /// 4. ping
    /// 5. when `sync_and_migrate` is set, synchronize registered tables and
    ///    run pending migrations
    ///
    /// # Errors
    ///
    /// The first failing step's error, tagged with its [`Stage`]. Nothing
    /// after a failed step runs.
    pub async fn run(&mut self) -> Result<Engine> {
        match self.run_stages().await {
            Ok(engine) => Ok(engine),
            Err(e) => {
                error!(
                    driver = %self.config.driver,
                    stage = e.stage().map(|s| s.as_str()).unwrap_or("bootstrap"),
                    state = %self.state,
                    error = %e,
                    "Database bootstrap failed"
                );
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<Engine> {
        if self.state != BootstrapState::Disconnected {
            return Err(DatabaseError::InvalidTransition {
                from: self.state.as_str(),
                to: BootstrapState::Connected.as_str(),
            });
        }
        global_init();

        let engine = factory::build_engine(self.config, &self.support).await?;
        engine.set_mapper(GonicMapper);
        engine.show_sql(self.config.log_sql);

        let limits = engine.limits();
        debug!(
            max_open = limits.max_open,
            max_idle = limits.max_idle,
            max_lifetime = ?limits.max_lifetime,
            "Pool limits applied"
        );
        for hook in &self.hooks {
            engine.add_hook(Arc::clone(hook));
        }

        engine
            .ping()
            .await
            .map_err(|e| DatabaseError::connect_failed(Stage::Ping, e))?;
        self.state.advance(BootstrapState::Connected)?;
        info!(driver = %engine.driver(), "Connected to database");

        if !self.config.sync_and_migrate {
            debug!("Schema sync and migrations disabled");
            return Ok(engine);
        }

        engine
            .sync(self.registry.tables())
            .await
            .map_err(DatabaseError::schema_sync)?;
        self.state.advance(BootstrapState::SchemaReady)?;
        info!(tables = self.registry.tables().len(), "Tables synchronized");

        let applied = Migrator::new(&engine, self.registry.migrations())
            .migrate()
            .await?;
        self.state.advance(BootstrapState::Migrated)?;
        info!(applied = applied.len(), "Migrations complete");

        Ok(engine)
    }
}

/// Bootstrap an engine with the default tracing hook attached
pub async fn new_engine(config: &Config, registry: &Registry) -> Result<Engine> {
    Bootstrapper::new(config, registry)
        .with_hook(Arc::new(TracingHook))
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = BootstrapState::Disconnected;
        assert!(state.advance(BootstrapState::SchemaReady).is_err());
        state.advance(BootstrapState::Connected).unwrap();
        state.advance(BootstrapState::SchemaReady).unwrap();
        state.advance(BootstrapState::Migrated).unwrap();

        let err = state.advance(BootstrapState::Connected).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::InvalidTransition {
                from: "migrated",
                to: "connected"
            }
        ));
    }

    #[cfg(feature = "sqlite")]
    mod sqlite {
        use super::*;
        use crate::core::database_types::Driver;
        use crate::core::hooks::test_support::RecordingHook;
        use crate::core::migration::Migration;
        use crate::core::schema::{ColumnDescriptor, ColumnType, TableDescriptor};
        use tempfile::TempDir;

        fn config(dir: &TempDir) -> Config {
            Config::new(Driver::Sqlite3).with_path(dir.path().join("db").join("app.db"))
        }

        fn registry() -> Registry {
            let mut registry = Registry::new();
            registry
                .add_tables([TableDescriptor::new("AccessToken")
                    .column(
                        ColumnDescriptor::new("ID", ColumnType::BigInt)
                            .primary_key()
                            .auto_increment(),
                    )
                    .column(ColumnDescriptor::new("UID", ColumnType::BigInt).indexed())])
                .add_migrations([Migration::sql(
                    "seed-token",
                    "INSERT INTO access_token (uid) VALUES (7)",
                )]);
            registry
        }

        #[tokio::test]
        async fn test_full_run() {
            let dir = TempDir::new().unwrap();
            let config = config(&dir);
            let registry = registry();
            let hook = Arc::new(RecordingHook::default());

            let mut bootstrapper = Bootstrapper::new(&config, &registry).with_hook(hook.clone());
            let engine = bootstrapper.run().await.unwrap();
            assert_eq!(bootstrapper.state(), BootstrapState::Migrated);
            assert_eq!(engine.map_name("AccessToken"), "access_token");
            assert_eq!(engine.count(&registry.tables()[0]).await.unwrap(), 1);
            assert!(!hook.statements.lock().is_empty());
        }

        #[tokio::test]
        async fn test_sync_disabled() {
            let dir = TempDir::new().unwrap();
            let config = config(&dir).with_sync_and_migrate(false);
            let registry = registry();

            let mut bootstrapper = Bootstrapper::new(&config, &registry);
            let engine = bootstrapper.run().await.unwrap();
            assert_eq!(bootstrapper.state(), BootstrapState::Connected);
            assert!(engine.count(&registry.tables()[0]).await.is_err());
        }

        #[tokio::test]
        async fn test_second_run_builds_nothing() {
            let dir = TempDir::new().unwrap();
            let config = config(&dir);
            let registry = registry();

            let mut bootstrapper = Bootstrapper::new(&config, &registry);
            let engine = bootstrapper.run().await.unwrap();
            drop(engine);
            std::fs::remove_dir_all(dir.path().join("db")).unwrap();

            let err = bootstrapper.run().await.err().unwrap();
            assert!(matches!(
                err,
                DatabaseError::InvalidTransition {
                    from: "migrated",
                    to: "connected"
                }
            ));
            assert_eq!(bootstrapper.state(), BootstrapState::Migrated);
            assert!(!dir.path().join("db").exists());
        }

        #[tokio::test]
        async fn test_failed_migration_stops_run() {
            let dir = TempDir::new().unwrap();
            let config = config(&dir);
            let mut registry = registry();
            registry.add_migrations([Migration::sql("broken", "INSERT INTO nowhere VALUES (1)")]);

            let mut bootstrapper = Bootstrapper::new(&config, &registry);
            let err = bootstrapper.run().await.err().unwrap();
            assert_eq!(err.stage(), Some(Stage::Migrate));
            assert_eq!(bootstrapper.state(), BootstrapState::SchemaReady);
        }
    }
}
