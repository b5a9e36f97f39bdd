//! Database backend implementations
//!
//! Each backend wraps one driver's native pool behind
//! [`ConnectionPool`]. Backends are compiled in through cargo features.

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mssql")]
pub use mssql::MssqlPool;
#[cfg(feature = "mysql")]
pub use mysql::MysqlPool;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPool;
#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePool;

use crate::core::database::{ConnectionPool, PoolLimits};
use crate::core::database_types::{Driver, DriverSupport};
use crate::core::error::{DatabaseError, Result};

/// Open a pool for `driver` over an already-resolved connection string
///
/// No connection is made; the first acquire or ping does that. Fails with
/// [`DatabaseError::CapabilityDisabled`] when `support` excludes the driver or
/// its backend was not compiled in.
pub async fn open_pool(
    driver: Driver,
    conn_str: &str,
    limits: PoolLimits,
    support: &DriverSupport,
) -> Result<Box<dyn ConnectionPool>> {
    support.require(driver)?;

    match driver {
        #[cfg(feature = "sqlite")]
        Driver::Sqlite3 => Ok(Box::new(SqlitePool::open(conn_str, limits)?)),
        #[cfg(feature = "postgres")]
        Driver::Postgres => Ok(Box::new(PostgresPool::open(conn_str, limits)?)),
        #[cfg(feature = "mysql")]
        Driver::Mysql => Ok(Box::new(MysqlPool::open(conn_str, limits)?)),
        #[cfg(feature = "mssql")]
        Driver::Mssql => Ok(Box::new(MssqlPool::open(conn_str, limits)?)),
        #[allow(unreachable_patterns)]
        other => {
            let _ = (conn_str, limits);
            Err(DatabaseError::CapabilityDisabled { driver: other })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_driver() {
        let support = DriverSupport::compiled().with(Driver::Sqlite3, false);
        let err = open_pool(
            Driver::Sqlite3,
            "file::memory:",
            PoolLimits::default(),
            &support,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(
            err,
            DatabaseError::CapabilityDisabled {
                driver: Driver::Sqlite3
            }
        ));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_open_sqlite() {
        let pool = open_pool(
            Driver::Sqlite3,
            "file:open_pool_test?mode=memory&cache=shared",
            PoolLimits::default(),
            &DriverSupport::compiled(),
        )
        .await
        .unwrap();
        assert_eq!(pool.driver(), Driver::Sqlite3);
        tokio_test::assert_ok!(pool.ping().await);
    }
}
