//! # Rust DB Bootstrap
//!
//! Database-connection bootstrap for application services: read a driver
//! agnostic configuration, synthesize the driver's connection string, open a
//! pooled engine, verify connectivity, synchronize registered tables and run
//! pending migrations. The result is one shared [`Engine`] used by the rest of
//! the program.
//!
//! ## Features
//!
//! - **Four drivers**: MySQL, PostgreSQL, Microsoft SQL Server and SQLite,
//!   each behind a cargo feature
//! - **Connection strings**: synthesized from [`Config`] with the exact format
//!   each driver expects, or taken verbatim from `connection_url`
//! - **Pooling**: open/idle/lifetime limits applied to the native pool
//! - **Schema sync**: create missing tables, columns and indexes
//! - **Migrations**: ordered, recorded, applied once
//! - **Transactions**: cancellable create/delete helpers
//! - **Observability**: `tracing` events for every stage and statement
//!
//! ## Supported Databases
//!
//! | Driver | Feature | Pool |
//! |--------|---------|------|
//! | SQLite | `sqlite` (default) | deadpool-sqlite |
//! | PostgreSQL | `postgres` | deadpool-postgres |
//! | MySQL | `mysql` | mysql_async |
//! | SQL Server | `mssql` | bb8 + tiberius |
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! rust_db_bootstrap = { version = "0.1", features = ["sqlite"] }
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```rust,no_run
//! use rust_db_bootstrap::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut registry = Registry::new();
//!     registry.add_tables([TableDescriptor::new("AccessToken")
//!         .column(ColumnDescriptor::new("ID", ColumnType::BigInt).primary_key().auto_increment())
//!         .column(ColumnDescriptor::new("Token", ColumnType::Text))]);
//!
//!     let config = Config::new(Driver::Sqlite3).with_path("data/app.db");
//!     let engine = new_engine(&config, &registry).await?;
//!     println!("{} tokens", engine.count(&registry.tables()[0]).await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! src/
//! ├── core/                  # Driver-independent bootstrap logic
//! │   ├── bootstrap.rs       # Bring-up sequence
//! │   ├── config.rs          # Config and environment loading
//! │   ├── connection_string.rs
//! │   ├── engine.rs          # Shared engine handle
//! │   ├── migration.rs       # Migrator
//! │   ├── schema.rs          # Table descriptors and sync
//! │   └── ...
//! ├── backends/              # One native pool per driver
//! └── lib.rs
//! ```

/// Core bootstrap types
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_db_bootstrap::prelude::*;
///
/// let config = Config::new(Driver::Sqlite3);
/// assert_eq!(config.driver, Driver::Sqlite3);
/// ```
pub mod prelude {
    pub use crate::core::{
        new_engine, Bootstrapper, ColumnDescriptor, ColumnType, Config, DatabaseError,
        DatabaseResult, DatabaseRow, DatabaseValue, Driver, Engine, Entity, Executor, Migration,
        Registry, Result, Session, TableDescriptor,
    };
}

// Re-export at root level for convenience
pub use core::{
    create_test_engine, new_engine, BootstrapState, Bootstrapper, ColumnDescriptor, ColumnType,
    Config, DatabaseError, DatabaseResult, DatabaseRow, DatabaseValue, Driver, DriverSupport,
    Engine, Entity, Executor, FixtureLoader, Migration, MigrationAction, Migrator, QueryHook,
    Registry, Result, Session, Stage, TableDescriptor,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        use prelude::*;

        let driver: Driver = "sqlite3".parse().unwrap();
        assert_eq!(driver.to_str(), "sqlite3");
        assert!(!driver.is_networked());
    }

    #[test]
    fn test_stage_survives_wrapping() {
        let err = DatabaseError::connect_failed(Stage::Ping, DatabaseError::pool("refused"));
        assert_eq!(err.stage(), Some(Stage::Ping));
        assert!(matches!(err.root_cause(), DatabaseError::Pool(_)));
    }
}
