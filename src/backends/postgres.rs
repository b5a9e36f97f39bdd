//! PostgreSQL backend
//!
//! A deadpool-postgres pool over tokio-postgres clients. Connections are made
//! without TLS; a server that insists on `sslmode=require` rejects them.

use crate::core::{
    database::{Connection, ConnectionPool, PoolLimits, PoolStatus},
    database_types::Driver,
    error::{DatabaseError, Result},
    value::{DatabaseResult, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime};
use bytes::BytesMut;
use std::cell::Cell;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, trace};

/// Pooled PostgreSQL database
pub struct PostgresPool {
    pool: Pool,
    limits: PoolLimits,
}

impl PostgresPool {
    /// Create a pool for a `postgres://` URL or key/value connection string
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::ConnectionString`] if tokio-postgres cannot
    /// parse the string.
    pub fn open(conn_str: &str, limits: PoolLimits) -> Result<Self> {
        let config: tokio_postgres::Config = conn_str
            .parse()
            .map_err(|e: tokio_postgres::Error| DatabaseError::ConnectionString(e.to_string()))?;

        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let mut builder = Pool::builder(manager).runtime(Runtime::Tokio1);
        if limits.max_open > 0 {
            builder = builder.max_size(limits.max_open as usize);
        }
        let pool = builder
            .build()
            .map_err(|e| DatabaseError::pool(format!("failed to create pool: {}", e)))?;

        debug!(
            max_open = limits.max_open,
            max_idle = limits.effective_max_idle(),
            "Created PostgreSQL pool"
        );

        Ok(Self { pool, limits })
    }
}

#[async_trait]
impl ConnectionPool for PostgresPool {
    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        loop {
            let object = self.pool.get().await.map_err(pool_error)?;

            if self.limits.expired(Object::metrics(&object).age()) {
                trace!("Closing PostgreSQL connection past its lifetime");
                drop(Object::take(object));
                continue;
            }

            return Ok(Box::new(PostgresConnection {
                object: Some(object),
                pool: self.pool.clone(),
                limits: self.limits,
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

/// A connection checked out of a [`PostgresPool`]
pub struct PostgresConnection {
    object: Option<Object>,
    pool: Pool,
    limits: PoolLimits,
}

impl PostgresConnection {
    fn client(&self) -> Result<&Object> {
        self.object
            .as_ref()
            .ok_or_else(|| DatabaseError::pool("connection already released"))
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let postgres_params: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(value_to_param).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = postgres_params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        Ok(self.client()?.execute(sql, &param_refs).await?)
    }

    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let postgres_params: Vec<Box<dyn ToSql + Sync + Send>> =
            params.iter().map(value_to_param).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = postgres_params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self.client()?.query(sql, &param_refs).await?;
        Ok(rows.iter().map(row_to_database_row).collect())
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<()> {
        Ok(self.client()?.batch_execute(sql).await?)
    }

    fn discard(mut self: Box<Self>) {
        if let Some(object) = self.object.take() {
            drop(Object::take(object));
        }
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            drop(object);
            trim_idle(&self.pool, self.limits);
        }
    }
}

/// Convert a tokio_postgres Row to a DatabaseRow
///
/// Columns of types without a native mapping are read as text, or null when
/// they have no text form.
fn row_to_database_row(row: &Row) -> DatabaseRow {
    let mut db_row = DatabaseRow::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_().name() {
            "bool" => row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .flatten()
                .map(DatabaseValue::Bool),
            "int2" => row
                .try_get::<_, Option<i16>>(idx)
                .ok()
                .flatten()
                .map(|v| DatabaseValue::Int(i32::from(v))),
            "int4" => row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .flatten()
                .map(DatabaseValue::Int),
            "int8" => row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(DatabaseValue::Long),
            "float4" => row
                .try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .map(|v| DatabaseValue::Double(f64::from(v))),
            "float8" => row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .flatten()
                .map(DatabaseValue::Double),
            "bytea" => row
                .try_get::<_, Option<Vec<u8>>>(idx)
                .ok()
                .flatten()
                .map(DatabaseValue::Bytes),
            _ => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(DatabaseValue::String),
        };
        db_row.insert(
            column.name().to_string(),
            value.unwrap_or(DatabaseValue::Null),
        );
    }

    db_row
}

/// NULL bindable to a parameter of any type
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert DatabaseValue to postgres parameter
fn value_to_param(value: &DatabaseValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        DatabaseValue::Null => Box::new(SqlNull),
        DatabaseValue::Bool(v) => Box::new(*v),
        DatabaseValue::Int(v) => Box::new(*v),
        DatabaseValue::Long(v) => Box::new(*v),
        DatabaseValue::Double(v) => Box::new(*v),
        DatabaseValue::String(v) => Box::new(v.clone()),
        DatabaseValue::Bytes(v) => Box::new(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection_string;

    fn get_postgres_url() -> Option<String> {
        std::env::var("POSTGRES_URL").ok()
    }

    #[tokio::test]
    async fn test_open_accepts_synthesized_urls() {
        let limits = PoolLimits::default();
        let tcp = connection_string::postgres("db:5433", "pg", "secret", "app", "?", "disable");
        assert!(PostgresPool::open(&tcp, limits).is_ok());

        let socket = connection_string::postgres("/var/run/postgresql", "pg", "", "app", "?", "disable");
        assert!(PostgresPool::open(&socket, limits).is_ok());
    }

    #[tokio::test]
    async fn test_open_rejects_garbage() {
        let err = PostgresPool::open("postgres://host:notaport/db", PoolLimits::default())
            .err()
            .unwrap();
        assert!(matches!(err, DatabaseError::ConnectionString(_)));
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test --features postgres -- --ignored
    async fn test_postgres_roundtrip() -> Result<()> {
        let url = match get_postgres_url() {
            Some(url) => url,
            None => {
                eprintln!("Skipping test: POSTGRES_URL not set");
                return Ok(());
            }
        };

        let pool = PostgresPool::open(&url, PoolLimits::default())?;
        pool.ping().await?;

        let mut conn = pool.acquire().await?;
        conn.execute_batch(
            "DROP TABLE IF EXISTS bootstrap_pg_test; \
             CREATE TABLE bootstrap_pg_test (id BIGSERIAL PRIMARY KEY, name TEXT)",
        )
        .await?;
        let affected = conn
            .execute(
                "INSERT INTO bootstrap_pg_test (name) VALUES ($1)",
                &["alice".into()],
            )
            .await?;
        assert_eq!(affected, 1);

        let rows = conn
            .query("SELECT COUNT(*) AS count FROM bootstrap_pg_test", &[])
            .await?;
        assert_eq!(rows[0].get("count"), Some(&DatabaseValue::Long(1)));

        conn.execute_batch("DROP TABLE bootstrap_pg_test").await?;
        Ok(())
    }
}
