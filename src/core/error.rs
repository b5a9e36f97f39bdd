//! Error types for the bootstrap layer
//!
//! Every stage of engine bring-up fails fast. Errors raised inside a stage are
//! wrapped with the [`Stage`] that produced them rather than replaced, so the
//! root cause stays reachable through [`std::error::Error::source`].

use super::database_types::Driver;
use std::path::PathBuf;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Step of the engine bring-up sequence an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Connection-string synthesis
    ConnectionString,
    /// Pool / engine construction
    EngineConstruction,
    /// Liveness check
    Ping,
    /// Table synchronization
    SchemaSync,
    /// Migration run
    Migrate,
}

impl Stage {
    /// Short name used in log fields and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ConnectionString => "connection string",
            Stage::EngineConstruction => "engine construction",
            Stage::Ping => "ping",
            Stage::SchemaSync => "schema sync",
            Stage::Migrate => "migrate",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Driver name is not one of the four supported dialects
    #[error("unknown database type: {0}")]
    UnsupportedDriver(String),

    /// Driver support was not compiled into this build
    #[error("this binary version does not build support for {driver}")]
    CapabilityDisabled { driver: Driver },

    /// Parent directory of a file database could not be created
    #[error("failed to create directories for {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Connection string could not be built or parsed
    #[error("invalid connection string: {0}")]
    ConnectionString(String),

    /// Engine construction or liveness check failed
    #[error("failed to connect to database ({stage}): {source}")]
    ConnectFailed {
        stage: Stage,
        #[source]
        source: Box<DatabaseError>,
    },

    /// Registered tables could not be synchronized
    #[error("sync database struct error: {source}")]
    SchemaSync {
        #[source]
        source: Box<DatabaseError>,
    },

    /// A migration failed or the migration list is malformed
    #[error("migrate: {message}")]
    Migration {
        message: String,
        #[source]
        source: Option<Box<DatabaseError>>,
    },

    /// Delete affected a number of rows other than one
    #[error("id or uuid not exist: {table} ({affected} rows affected)")]
    NotFoundOnDelete { table: String, affected: u64 },

    /// Entity carries no value usable as a delete condition
    #[error("no condition for delete on {0}")]
    NoCondition(String),

    /// Fixture file could not be read or loaded
    #[error("fixture {}: {message}", .path.display())]
    Fixture { path: PathBuf, message: String },

    /// Configuration value is missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Connection pool error
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Operation aborted by the caller's cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Bootstrap state machine rejected a transition
    #[error("invalid bootstrap transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// PostgreSQL error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    PostgresError(#[from] tokio_postgres::Error),

    /// MySQL error
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    MysqlError(#[from] mysql_async::Error),

    /// MSSQL error
    #[cfg(feature = "mssql")]
    #[error("MSSQL error: {0}")]
    MssqlError(#[from] tiberius::error::Error),
}

impl DatabaseError {
    /// Wrap an error raised while connecting
    pub fn connect_failed(stage: Stage, source: DatabaseError) -> Self {
        DatabaseError::ConnectFailed {
            stage,
            source: Box::new(source),
        }
    }

    /// Wrap an error raised while synchronizing tables
    pub fn schema_sync(source: DatabaseError) -> Self {
        DatabaseError::SchemaSync {
            source: Box::new(source),
        }
    }

    /// Create a migration error without an underlying cause
    pub fn migration<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Migration {
            message: msg.into(),
            source: None,
        }
    }

    /// Wrap an error raised while running a migration
    pub fn migration_failed<S: Into<String>>(msg: S, source: DatabaseError) -> Self {
        DatabaseError::Migration {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Config(msg.into())
    }

    /// Create a new query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::QueryError(msg.into())
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a pool error
    pub fn pool<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Pool(msg.into())
    }

    /// Stage this error is tagged with, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DatabaseError::ConnectFailed { stage, .. } => Some(*stage),
            DatabaseError::SchemaSync { .. } => Some(Stage::SchemaSync),
            DatabaseError::Migration { .. } => Some(Stage::Migrate),
            _ => None,
        }
    }

    /// Innermost error, following boxed stage wrappers
    pub fn root_cause(&self) -> &DatabaseError {
        match self {
            DatabaseError::ConnectFailed { source, .. } | DatabaseError::SchemaSync { source } => {
                source.root_cause()
            }
            DatabaseError::Migration {
                source: Some(source),
                ..
            } => source.root_cause(),
            other => other,
        }
    }
}
