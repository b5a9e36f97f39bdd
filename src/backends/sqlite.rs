//! SQLite backend
//!
//! Connections come from a deadpool-sqlite pool and every call runs on the
//! pool's blocking threads through `interact`. Pool limits that deadpool has no
//! native knob for (max idle, max lifetime) are enforced when a connection is
//! handed back.
//!
//! Synthesized strings open the database with `cache=shared`. Table lock
//! conflicts between pooled connections then surface as
//! `SQLITE_LOCKED_SHAREDCACHE`, which the busy handler never retries; rusqlite
//! is built with `unlock_notify` so such a statement blocks until the holder
//! commits.

use crate::core::{
    connection_string::query_param,
    database::{Connection, ConnectionPool, PoolLimits, PoolStatus},
    database_types::Driver,
    error::{DatabaseError, Result},
    value::{DatabaseResult, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use deadpool_sqlite::{Config, Object, Pool, PoolConfig, PoolError, Runtime};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Row};
use std::cell::Cell;
use std::time::Duration;
use tracing::{debug, trace};

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Busy timeout used when the connection string carries none
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(500);

/// Pooled SQLite database
pub struct SqlitePool {
    pool: Pool,
    limits: PoolLimits,
    busy_timeout: Duration,
    operation_timeout: Duration,
}

impl SqlitePool {
    /// Create a pool for a `file:` URI or plain path
    ///
    /// No connection is opened until the first acquire. The `_busy_timeout`
    /// URI parameter (milliseconds) sets the busy handler of every connection.
    ///
    /// # Errors
    ///
    /// Returns a pool error if deadpool rejects the configuration
    pub fn open(conn_str: &str, limits: PoolLimits) -> Result<Self> {
        let mut config = Config::new(conn_str);
        if limits.max_open > 0 {
            config.pool = Some(PoolConfig::new(limits.max_open as usize));
        }

        let pool = config
            .create_pool(Runtime::Tokio1)
            .map_err(|e| DatabaseError::pool(format!("failed to create pool: {}", e)))?;

        let busy_timeout = query_param(conn_str, "_busy_timeout")
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BUSY_TIMEOUT);

        debug!(
            max_open = limits.max_open,
            max_idle = limits.effective_max_idle(),
            busy_timeout_ms = busy_timeout.as_millis() as u64,
            "Created SQLite pool"
        );

        Ok(Self {
            pool,
            limits,
            busy_timeout,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    /// Set the timeout for a single call on a connection
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

#[async_trait]
impl ConnectionPool for SqlitePool {
    fn driver(&self) -> Driver {
        Driver::Sqlite3
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        loop {
            let object = self.pool.get().await.map_err(pool_error)?;

            if self.limits.expired(Object::metrics(&object).age()) {
                trace!("Closing SQLite connection past its lifetime");
                drop(Object::take(object));
                continue;
            }

            return Ok(Box::new(SqliteConnection {
                object: Some(object),
                pool: self.pool.clone(),
                limits: self.limits,
                busy_timeout: self.busy_timeout,
                operation_timeout: self.operation_timeout,
            }));
        }
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    fn limits(&self) -> PoolLimits {
        self.limits
    }
}

fn pool_error(e: PoolError) -> DatabaseError {
    match e {
        PoolError::Backend(e) => DatabaseError::from(e),
        other => DatabaseError::pool(format!("failed to acquire connection: {}", other)),
    }
}

/// Drop idle connections above the idle limit or past their lifetime
fn trim_idle(pool: &Pool, limits: PoolLimits) {
    let max_idle = limits.effective_max_idle();
    let kept = Cell::new(0u32);
    let _ = pool.retain(|_, metrics| {
        if limits.expired(metrics.age()) || kept.get() >= max_idle {
            return false;
        }
        kept.set(kept.get() + 1);
        true
    });
}

/// A connection checked out of a [`SqlitePool`]
pub struct SqliteConnection {
    object: Option<Object>,
    pool: Pool,
    limits: PoolLimits,
    busy_timeout: Duration,
    operation_timeout: Duration,
}

impl SqliteConnection {
    async fn interact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let object = self
            .object
            .as_ref()
            .ok_or_else(|| DatabaseError::pool("connection already released"))?;
        let busy_timeout = self.busy_timeout;
        let operation_timeout = self.operation_timeout;

        tokio::time::timeout(
            operation_timeout,
            object.interact(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                f(conn)
            }),
        )
        .await
        .map_err(|_| {
            DatabaseError::query(format!(
                "operation timed out after {}ms",
                operation_timeout.as_millis()
            ))
        })?
        .map_err(|e| DatabaseError::pool(format!("interact error: {}", e)))?
        .map_err(DatabaseError::from)
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let sql = sql.to_string();
        let params: Vec<Value> = params.iter().map(value_to_param).collect();

        self.interact(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            if stmt.column_count() == 0 {
                return Ok(stmt.execute(params_from_iter(params.iter()))? as u64);
            }
            // Statements returning rows are stepped to completion
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            while rows.next()?.is_some() {}
            Ok(0)
        })
        .await
    }

    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let sql = sql.to_string();
        let params: Vec<Value> = params.iter().map(value_to_param).collect();

        self.interact(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), row_to_database_row)?
                .collect::<rusqlite::Result<DatabaseResult>>()?;
            Ok(rows)
        })
        .await
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.interact(move |conn| conn.execute_batch(&sql)).await
    }

    fn discard(mut self: Box<Self>) {
        if let Some(object) = self.object.take() {
            drop(Object::take(object));
        }
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            drop(object);
            trim_idle(&self.pool, self.limits);
        }
    }
}

/// Convert a rusqlite Row to a DatabaseRow
fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
    let mut db_row = DatabaseRow::new();
    let column_count = row.as_ref().column_count();

    for i in 0..column_count {
        let column_name = row.as_ref().column_name(i)?.to_string();
        let value = match row.get_ref(i)? {
            ValueRef::Null => DatabaseValue::Null,
            ValueRef::Integer(v) => DatabaseValue::Long(v),
            ValueRef::Real(v) => DatabaseValue::Double(v),
            ValueRef::Text(v) => DatabaseValue::String(String::from_utf8_lossy(v).to_string()),
            ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
        };
        db_row.insert(column_name, value);
    }

    Ok(db_row)
}

/// Convert DatabaseValue to an owned rusqlite value
fn value_to_param(value: &DatabaseValue) -> Value {
    match value {
        DatabaseValue::Null => Value::Null,
        DatabaseValue::Bool(v) => Value::Integer(i64::from(*v)),
        DatabaseValue::Int(v) => Value::Integer(i64::from(*v)),
        DatabaseValue::Long(v) => Value::Integer(*v),
        DatabaseValue::Double(v) => Value::Real(*v),
        DatabaseValue::String(v) => Value::Text(v.clone()),
        DatabaseValue::Bytes(v) => Value::Blob(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn limits(max_open: u32, max_idle: u32) -> PoolLimits {
        PoolLimits {
            max_open,
            max_idle,
            max_lifetime: None,
        }
    }

    fn file_uri(dir: &TempDir) -> String {
        format!(
            "file:{}?cache=shared&mode=rwc&_busy_timeout=250&_txlock=immediate",
            dir.path().join("pool.db").display()
        )
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::open(&file_uri(&dir), limits(2, 2)).unwrap();
        assert_eq!(pool.busy_timeout, Duration::from_millis(250));

        let mut conn = pool.acquire().await.unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, score REAL)")
            .await
            .unwrap();
        let affected = conn
            .execute(
                "INSERT INTO items (name, score) VALUES (?, ?)",
                &["apple".into(), DatabaseValue::Double(1.5)],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn
            .query("SELECT id, name, score FROM items WHERE name = ?", &["apple".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&DatabaseValue::Long(1)));
        assert_eq!(rows[0].get("score"), Some(&DatabaseValue::Double(1.5)));
    }

    #[tokio::test]
    async fn test_execute_tolerates_rows() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::open(&file_uri(&dir), limits(1, 1)).unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.execute("SELECT 1", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idle_connections_trimmed() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::open(&file_uri(&dir), limits(4, 1)).unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_eq!(pool.status().size, 3);

        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.status().size, 1);
        assert_eq!(pool.status().available, 1);
    }

    #[tokio::test]
    async fn test_discard_frees_slot() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::open(&file_uri(&dir), limits(1, 1)).unwrap();

        let conn = pool.acquire().await.unwrap();
        conn.discard();
        assert_eq!(pool.status().size, 0);

        // The single slot can be taken again
        let mut conn = pool.acquire().await.unwrap();
        conn.query("SELECT 1 AS one", &[]).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_share_cache() {
        let dir = TempDir::new().unwrap();
        let pool = std::sync::Arc::new(SqlitePool::open(&file_uri(&dir), limits(4, 4)).unwrap());
        pool.acquire()
            .await
            .unwrap()
            .execute_batch("CREATE TABLE hits (id INTEGER PRIMARY KEY, n INTEGER)")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for n in 0..16i64 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire().await?;
                conn.execute("BEGIN IMMEDIATE", &[]).await?;
                conn.execute("INSERT INTO hits (n) VALUES (?)", &[n.into()]).await?;
                conn.execute("COMMIT", &[]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        let rows = conn.query("SELECT COUNT(*) AS c FROM hits", &[]).await.unwrap();
        assert_eq!(rows[0].get("c"), Some(&DatabaseValue::Long(16)));
    }

    #[tokio::test]
    async fn test_ping_missing_directory() {
        let pool = SqlitePool::open("file:/nonexistent/dir/x.db?mode=ro", limits(1, 1)).unwrap();
        let err = pool.ping().await.unwrap_err();
        assert!(matches!(err, DatabaseError::SqliteError(_)));
    }
}
