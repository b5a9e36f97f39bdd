//! Connection and pool traits
//!
//! Each backend implements [`ConnectionPool`] over its native pool and hands
//! out [`Connection`]s. The engine only ever talks to these traits, so it
//! works the same way for every driver.

use super::database_types::Driver;
use super::error::Result;
use super::value::{DatabaseResult, DatabaseValue};
use async_trait::async_trait;
use std::time::Duration;

/// Statement used by the default liveness check
pub const PING_SQL: &str = "SELECT 1";

/// Limits applied to a pool at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolLimits {
    /// Upper bound on open connections; 0 leaves the backend default
    pub max_open: u32,
    /// Connections kept idle after use
    pub max_idle: u32,
    /// Connections older than this are closed instead of reused
    pub max_lifetime: Option<Duration>,
}

impl PoolLimits {
    /// Idle connections allowed, never above a non-zero max open
    pub fn effective_max_idle(&self) -> u32 {
        if self.max_open > 0 {
            self.max_idle.min(self.max_open)
        } else {
            self.max_idle
        }
    }

    /// Whether a connection of the given age has outlived the lifetime limit
    pub fn expired(&self, age: Duration) -> bool {
        self.max_lifetime.is_some_and(|max| age >= max)
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Open connections, idle or in use
    pub size: usize,
    /// Idle connections ready for use
    pub available: usize,
    /// Callers waiting for a connection
    pub waiting: usize,
}

/// A connection checked out of a pool
///
/// Dropping it returns the connection to its pool.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement and return the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64>;

    /// Execute a statement and return its rows
    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult>;

    /// Execute a script of one or more statements without parameters
    async fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Close the physical connection instead of returning it to the pool
    ///
    /// Used when the connection state is unknown, e.g. a transaction is still
    /// open. The pool slot is released either way.
    fn discard(self: Box<Self>);
}

/// Pool of connections to one database
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    fn driver(&self) -> Driver;

    /// Check a connection out of the pool, opening one if needed
    async fn acquire(&self) -> Result<Box<dyn Connection>>;

    /// Liveness check
    async fn ping(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        conn.query(PING_SQL, &[]).await?;
        Ok(())
    }

    fn status(&self) -> PoolStatus;

    fn limits(&self) -> PoolLimits;
}
