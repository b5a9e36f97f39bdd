//! Engine construction from a [`Config`]

use super::config::Config;
use super::connection_string::{self, query_param};
use super::database::PoolLimits;
use super::database_types::{Driver, DriverSupport};
use super::dialect::{Dialect, PARAM_ROW_FORMAT, PARAM_TXLOCK};
use super::engine::Engine;
use super::error::{DatabaseError, Result, Stage};
use crate::backends;
use tracing::debug;

/// Pool limits carried by a configuration
pub fn pool_limits(config: &Config) -> PoolLimits {
    PoolLimits {
        max_open: config.max_open_conns,
        max_idle: config.max_idle_conns,
        max_lifetime: config.conn_max_lifetime,
    }
}

/// Dialect for a driver and its resolved connection string
pub fn dialect_for(driver: Driver, conn_str: &str) -> Dialect {
    let mut dialect = Dialect::new(driver);
    match driver {
        Driver::Mysql => dialect.set_param(PARAM_ROW_FORMAT, "DYNAMIC"),
        Driver::Sqlite3 => {
            if let Some(lock) = query_param(conn_str, "_txlock") {
                dialect.set_param(PARAM_TXLOCK, lock);
            }
        }
        Driver::Postgres | Driver::Mssql => {}
    }
    dialect
}

/// Build an engine without connecting
///
/// A non-empty `connection_url` is used verbatim; otherwise the string is
/// synthesized. Errors are tagged with [`Stage::ConnectionString`] or
/// [`Stage::EngineConstruction`].
pub async fn build_engine(config: &Config, support: &DriverSupport) -> Result<Engine> {
    let conn_str = if config.connection_url.is_empty() {
        connection_string::build(config, support)
            .map_err(|e| DatabaseError::connect_failed(Stage::ConnectionString, e))?
    } else {
        config.connection_url.clone()
    };

    debug!(
        driver = %config.driver,
        connection = %connection_string::sanitize(&conn_str),
        "Resolved connection string"
    );

    let limits = pool_limits(config);
    let pool = backends::open_pool(config.driver, &conn_str, limits, support)
        .await
        .map_err(|e| DatabaseError::connect_failed(Stage::EngineConstruction, e))?;

    Ok(Engine::new(
        pool,
        dialect_for(config.driver, &conn_str),
        config.schema.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pool_limits_from_config() {
        let config = Config::default().with_pool_limits(8, 3, Some(Duration::from_secs(300)));
        let limits = pool_limits(&config);
        assert_eq!(limits.max_open, 8);
        assert_eq!(limits.max_idle, 3);
        assert_eq!(limits.max_lifetime, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_dialect_params() {
        let mysql = dialect_for(Driver::Mysql, "root:pw@tcp(db)/app");
        assert_eq!(mysql.param(PARAM_ROW_FORMAT), Some("DYNAMIC"));

        let sqlite = dialect_for(
            Driver::Sqlite3,
            "file:data/app.db?cache=shared&mode=rwc&_busy_timeout=500&_txlock=immediate",
        );
        assert_eq!(sqlite.param(PARAM_TXLOCK), Some("immediate"));
        assert_eq!(sqlite.begin_sql(), "BEGIN IMMEDIATE");

        let postgres = dialect_for(Driver::Postgres, "postgres://pg@db:5432/app");
        assert_eq!(postgres.param(PARAM_ROW_FORMAT), None);
    }

    #[tokio::test]
    async fn test_connection_string_stage() {
        let config = Config::new(Driver::Sqlite3).with_path("");
        let err = build_engine(&config, &DriverSupport::compiled())
            .await
            .err()
            .unwrap();
        assert_eq!(err.stage(), Some(Stage::ConnectionString));
    }

    #[tokio::test]
    async fn test_capability_disabled() {
        let config = Config::new(Driver::Sqlite3);
        let err = build_engine(&config, &DriverSupport::none())
            .await
            .err()
            .unwrap();
        assert_eq!(err.stage(), Some(Stage::ConnectionString));
        assert!(matches!(
            err.root_cause(),
            DatabaseError::CapabilityDisabled {
                driver: Driver::Sqlite3
            }
        ));
    }

    #[tokio::test]
    async fn test_connection_url_skips_synthesis() {
        // An empty path would fail synthesis, the url bypasses it
        let config = Config::new(Driver::Sqlite3)
            .with_path("")
            .with_connection_url("file:factory_url_test?mode=memory&cache=shared");
        let support = DriverSupport::compiled();
        match build_engine(&config, &support).await {
            Ok(engine) => {
                assert_eq!(engine.driver(), Driver::Sqlite3);
                assert_eq!(engine.schema(), "public");
            }
            Err(e) => {
                assert!(!support.sqlite3);
                assert_eq!(e.stage(), Some(Stage::EngineConstruction));
            }
        }
    }
}
