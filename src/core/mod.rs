//! Core bootstrap types
//!
//! Configuration, connection-string synthesis, the engine and its sessions,
//! schema synchronization, migrations and the bootstrap sequence that ties
//! them together.

pub mod bootstrap;
pub mod config;
pub mod connection_string;
pub mod database;
pub mod database_types;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod factory;
pub mod fixtures;
pub mod hooks;
pub mod host_port;
pub mod migration;
pub mod names;
pub mod registry;
pub mod schema;
pub mod session;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use bootstrap::{new_engine, BootstrapState, Bootstrapper};
pub use config::Config;
pub use database::{Connection, ConnectionPool, PoolLimits, PoolStatus};
pub use database_types::{Driver, DriverSupport};
pub use dialect::Dialect;
pub use engine::{Engine, Executor};
pub use error::{DatabaseError, Result, Stage};
pub use fixtures::{create_test_engine, FixtureLoader};
pub use hooks::{QueryContext, QueryHook, TracingHook};
pub use migration::{Migration, MigrationAction, MigrationStatus, Migrator};
pub use names::{GonicMapper, NameMapper, SnakeMapper};
pub use registry::Registry;
pub use schema::{ColumnDescriptor, ColumnType, Entity, TableDescriptor};
pub use session::{Session, SessionState};
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue};
