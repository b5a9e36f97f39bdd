//! Shared engine handle
//!
//! An [`Engine`] wraps a connection pool together with everything needed to
//! turn table descriptors and entities into SQL: the dialect, the schema
//! namespace and the name mapper. It is cheap to clone and safe to share
//! across tasks for the lifetime of the process.

use super::database::{Connection, ConnectionPool, PoolLimits, PoolStatus};
use super::database_types::Driver;
use super::dialect::Dialect;
use super::error::{DatabaseError, Result};
use super::hooks::{QueryContext, QueryHook};
use super::names::{GonicMapper, NameMapper};
use super::schema::{self, Entity, TableDescriptor};
use super::session::Session;
use super::value::{DatabaseResult, DatabaseValue};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Log target of verbose-SQL output
pub const SQL_LOG_TARGET: &str = "rust_db_bootstrap::sql";

/// Operations callers run against an engine or a session
#[async_trait]
pub trait Executor: Send {
    /// Execute a statement, returning affected rows
    async fn exec(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64>;

    /// Run a query, returning its rows
    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult>;

    /// Insert an entity, returning affected rows
    async fn insert(&mut self, entity: &dyn Entity) -> Result<u64>;

    /// Delete the rows matching an entity, returning affected rows
    async fn delete(&mut self, entity: &dyn Entity) -> Result<u64>;

    /// Count the rows of a table
    async fn count(&mut self, table: &TableDescriptor) -> Result<u64>;
}

struct EngineInner {
    pool: Box<dyn ConnectionPool>,
    dialect: Dialect,
    schema: String,
    mapper: RwLock<Arc<dyn NameMapper>>,
    show_sql: AtomicBool,
    hooks: RwLock<Vec<Arc<dyn QueryHook>>>,
}

/// Pooled, shared database handle
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("driver", &self.driver())
            .field("schema", &self.inner.schema)
            .field("status", &self.status())
            .finish()
    }
}

impl Engine {
    /// Create an engine over a pool
    ///
    /// The engine starts with the [`GonicMapper`], verbose SQL off and no hooks.
    pub fn new(pool: Box<dyn ConnectionPool>, dialect: Dialect, schema: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                pool,
                dialect,
                schema: schema.into(),
                mapper: RwLock::new(Arc::new(GonicMapper)),
                show_sql: AtomicBool::new(false),
                hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn driver(&self) -> Driver {
        self.inner.dialect.driver()
    }

    pub fn dialect(&self) -> &Dialect {
        &self.inner.dialect
    }

    /// Schema namespace tables are qualified with
    pub fn schema(&self) -> &str {
        &self.inner.schema
    }

    /// Replace the identifier mapping convention
    pub fn set_mapper<M: NameMapper + 'static>(&self, mapper: M) {
        *self.inner.mapper.write() = Arc::new(mapper);
    }

    /// Map an object-style name to a database identifier
    pub fn map_name(&self, name: &str) -> String {
        self.inner.mapper.read().obj_to_table(name)
    }

    /// Mapped, quoted and schema-qualified table name
    pub fn table_name(&self, name: &str) -> String {
        self.inner
            .dialect
            .table_name(&self.inner.schema, &self.map_name(name))
    }

    /// Log every statement at INFO on [`SQL_LOG_TARGET`]
    pub fn show_sql(&self, enabled: bool) {
        self.inner.show_sql.store(enabled, Ordering::Relaxed);
    }

    pub fn is_show_sql(&self) -> bool {
        self.inner.show_sql.load(Ordering::Relaxed)
    }

    /// Attach a hook observing every statement
    pub fn add_hook(&self, hook: Arc<dyn QueryHook>) {
        self.inner.hooks.write().push(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.inner.hooks.read().len()
    }

    pub fn status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    pub fn limits(&self) -> PoolLimits {
        self.inner.pool.limits()
    }

    /// Liveness check against the database
    pub async fn ping(&self) -> Result<()> {
        debug!(driver = %self.driver(), "Pinging database");
        self.inner.pool.ping().await
    }

    /// Open a session holding one pooled connection
    pub async fn new_session(&self) -> Result<Session> {
        let conn = self.inner.pool.acquire().await?;
        Ok(Session::new(self.clone(), conn))
    }

    /// Execute a statement on a pooled connection in auto-commit mode
    pub async fn exec(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let mut conn = self.inner.pool.acquire().await?;
        self.run_execute(conn.as_mut(), sql, params).await
    }

    /// Run a query on a pooled connection
    pub async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let mut conn = self.inner.pool.acquire().await?;
        self.run_query(conn.as_mut(), sql, params).await
    }

    /// Execute a multi-statement script on a pooled connection
    pub async fn exec_batch(&self, sql: &str) -> Result<()> {
        let mut conn = self.inner.pool.acquire().await?;
        self.run_batch(conn.as_mut(), sql).await
    }

    pub async fn insert(&self, entity: &dyn Entity) -> Result<u64> {
        let (sql, params) = schema::insert_statement(self, entity)?;
        self.exec(&sql, &params).await
    }

    pub async fn delete(&self, entity: &dyn Entity) -> Result<u64> {
        let (sql, params) = schema::delete_statement(self, entity)?;
        self.exec(&sql, &params).await
    }

    pub async fn count(&self, table: &TableDescriptor) -> Result<u64> {
        let rows = self.query(&schema::count_sql(self, table), &[]).await?;
        count_from(rows)
    }

    /// Synchronize table descriptors into the live schema
    pub async fn sync(&self, tables: &[TableDescriptor]) -> Result<()> {
        schema::sync_tables(self, tables).await
    }

    fn before(&self, sql: &str, params: &[DatabaseValue]) -> Vec<Arc<dyn QueryHook>> {
        if self.is_show_sql() {
            if params.is_empty() {
                info!(target: SQL_LOG_TARGET, "[SQL] {}", sql);
            } else {
                let args: Vec<String> = params.iter().map(ToString::to_string).collect();
                info!(target: SQL_LOG_TARGET, "[SQL] {} [{}]", sql, args.join(", "));
            }
        }

        let hooks = self.inner.hooks.read().clone();
        let ctx = QueryContext {
            driver: self.driver(),
            sql,
            params,
        };
        for hook in &hooks {
            hook.before(&ctx);
        }
        hooks
    }

    fn after(
        &self,
        hooks: &[Arc<dyn QueryHook>],
        sql: &str,
        params: &[DatabaseValue],
        started: Instant,
        error: Option<&DatabaseError>,
    ) {
        let ctx = QueryContext {
            driver: self.driver(),
            sql,
            params,
        };
        let elapsed = started.elapsed();
        for hook in hooks {
            hook.after(&ctx, elapsed, error);
        }
    }

    pub(crate) async fn run_execute(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<u64> {
        let hooks = self.before(sql, params);
        let started = Instant::now();
        let result = conn.execute(sql, params).await;
        self.after(&hooks, sql, params, started, result.as_ref().err());
        result
    }

    pub(crate) async fn run_query(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let hooks = self.before(sql, params);
        let started = Instant::now();
        let result = conn.query(sql, params).await;
        self.after(&hooks, sql, params, started, result.as_ref().err());
        result
    }

    pub(crate) async fn run_batch(&self, conn: &mut dyn Connection, sql: &str) -> Result<()> {
        let hooks = self.before(sql, &[]);
        let started = Instant::now();
        let result = conn.execute_batch(sql).await;
        self.after(&hooks, sql, &[], started, result.as_ref().err());
        result
    }
}

/// Read the single `count` column of a COUNT query
pub(crate) fn count_from(rows: DatabaseResult) -> Result<u64> {
    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(|value| value.as_long())
        .map(|n| n.max(0) as u64)
        .ok_or_else(|| DatabaseError::query("count query returned no rows"))
}

#[async_trait]
impl Executor for Engine {
    async fn exec(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        Engine::exec(self, sql, params).await
    }

    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        Engine::query(self, sql, params).await
    }

    async fn insert(&mut self, entity: &dyn Entity) -> Result<u64> {
        Engine::insert(self, entity).await
    }

    async fn delete(&mut self, entity: &dyn Entity) -> Result<u64> {
        Engine::delete(self, entity).await
    }

    async fn count(&mut self, table: &TableDescriptor) -> Result<u64> {
        Engine::count(self, table).await
    }
}


#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::test_support::memory_engine;
    use super::*;
    use crate::core::hooks::test_support::RecordingHook;
    use crate::core::names::SnakeMapper;

    #[tokio::test]
    async fn test_exec_and_query() {
        let engine = memory_engine().await;
        engine
            .exec("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        let affected = engine
            .exec("INSERT INTO items (name) VALUES (?)", &["first".into()])
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = engine.query("SELECT name FROM items", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"].as_str(), Some("first"));
    }

    #[tokio::test]
    async fn test_hooks_see_every_statement() {
        let engine = memory_engine().await;
        let hook = Arc::new(RecordingHook::default());
        engine.add_hook(hook.clone());
        assert_eq!(engine.hook_count(), 1);

        engine.exec("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        assert!(engine.exec("INSERT INTO missing VALUES (1)", &[]).await.is_err());

        assert_eq!(hook.statements.lock().len(), 2);
        assert_eq!(*hook.failures.lock(), 1);
    }

    #[tokio::test]
    async fn test_mapper_and_table_names() {
        let engine = memory_engine().await;
        assert_eq!(engine.table_name("UserSSLKey"), "\"user_ssl_key\"");

        engine.set_mapper(SnakeMapper);
        assert_eq!(engine.map_name("UserID"), "user_i_d");
    }

    #[tokio::test]
    async fn test_ping_and_show_sql() {
        let engine = memory_engine().await;
        engine.ping().await.unwrap();

        assert!(!engine.is_show_sql());
        engine.show_sql(true);
        assert!(engine.is_show_sql());
        let rows = engine.query("SELECT 1 AS one", &[]).await.unwrap();
        assert_eq!(rows[0]["one"].as_long(), Some(1));
    }
}
