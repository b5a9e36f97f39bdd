//! Driver-agnostic database configuration
//!
//! A [`Config`] is an immutable bag of values handed to the bootstrapper. It is
//! usually read from `APP_DATABASE_*` environment variables, but can be built
//! in code with the `with_*` setters.

use super::database_types::Driver;
use super::error::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix shared by every environment variable [`Config::from_env`] reads
pub const ENV_PREFIX: &str = "APP_DATABASE_";

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Active driver
    pub driver: Driver,
    pub username: String,
    pub password: String,
    /// Database name; may itself carry `?key=value` parameters
    pub name: String,
    /// `host[:port]`, `host,port` (mssql) or an absolute unix socket path
    pub host: String,
    /// TLS mode (`disable`, `require`, ... or a mysql `tls` value)
    pub ssl_mode: String,
    /// Database file (sqlite3 only)
    pub path: PathBuf,
    /// Schema namespace
    pub schema: String,
    /// Busy timeout in milliseconds (sqlite3 only)
    pub timeout: u64,
    /// Log every statement
    pub log_sql: bool,
    /// Upper bound on open connections; 0 leaves the backend default
    pub max_open_conns: u32,
    /// Connections kept idle in the pool
    pub max_idle_conns: u32,
    /// Maximum lifetime of a physical connection; `None` is unbounded
    pub conn_max_lifetime: Option<Duration>,
    pub charset: String,
    /// Pre-built connection string; when non-empty it replaces synthesis
    pub connection_url: String,
    /// Synchronize registered tables and run migrations during bootstrap
    pub sync_and_migrate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: Driver::Sqlite3,
            username: "root".to_string(),
            password: "root".to_string(),
            name: "db".to_string(),
            host: "localhost:3306".to_string(),
            ssl_mode: "disable".to_string(),
            path: PathBuf::from("data/db/test.db"),
            schema: "public".to_string(),
            timeout: 500,
            log_sql: false,
            max_open_conns: 0,
            max_idle_conns: 2,
            conn_max_lifetime: None,
            charset: "utf8".to_string(),
            connection_url: String::new(),
            sync_and_migrate: true,
        }
    }
}

impl Config {
    /// Create a configuration for the given driver with default values
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            ..Default::default()
        }
    }

    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Read configuration through a custom variable lookup
    ///
    /// Unset variables keep their defaults. Malformed values fail with a
    /// [`DatabaseError::Config`] naming the variable.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));
        let mut config = Config::default();

        if let Some(v) = var("DRIVER") {
            config.driver = v.parse()?;
        }
        if let Some(v) = var("USERNAME") {
            config.username = v;
        }
        if let Some(v) = var("PASSWORD") {
            config.password = v;
        }
        if let Some(v) = var("NAME") {
            config.name = v;
        }
        if let Some(v) = var("HOST") {
            config.host = v;
        }
        if let Some(v) = var("SSLMODE") {
            config.ssl_mode = v;
        }
        if let Some(v) = var("PATH") {
            config.path = PathBuf::from(v);
        }
        if let Some(v) = var("SCHEMA") {
            config.schema = v;
        }
        if let Some(v) = var("TIMEOUT") {
            config.timeout = parse_number("TIMEOUT", &v)?;
        }
        if let Some(v) = var("LOG_SQL") {
            config.log_sql = parse_bool("LOG_SQL", &v)?;
        }
        if let Some(v) = var("MAX_OPEN_CONNS") {
            config.max_open_conns = parse_number("MAX_OPEN_CONNS", &v)?;
        }
        if let Some(v) = var("MAX_IDLE_CONNS") {
            config.max_idle_conns = parse_number("MAX_IDLE_CONNS", &v)?;
        }
        if let Some(v) = var("CONN_MAX_LIFE_TIME") {
            let lifetime = parse_duration(&v).ok_or_else(|| {
                DatabaseError::config(format!(
                    "{}CONN_MAX_LIFE_TIME: invalid duration '{}'",
                    ENV_PREFIX, v
                ))
            })?;
            config.conn_max_lifetime = (!lifetime.is_zero()).then_some(lifetime);
        }
        if let Some(v) = var("CHARSET") {
            config.charset = v;
        }
        if let Some(v) = var("CONNECTION_URL") {
            config.connection_url = v;
        }
        if let Some(v) = var("SYNC_AND_MIGRATE") {
            config.sync_and_migrate = parse_bool("SYNC_AND_MIGRATE", &v)?;
        }

        Ok(config)
    }

    /// Check the fields the active driver depends on
    ///
    /// Skipped entirely when a pre-built connection URL is present.
    pub fn validate(&self) -> Result<()> {
        if !self.connection_url.is_empty() {
            return Ok(());
        }
        match self.driver {
            Driver::Sqlite3 if self.path.as_os_str().is_empty() => {
                Err(DatabaseError::config("sqlite3 requires a database path"))
            }
            Driver::Mysql if self.host.is_empty() => {
                Err(DatabaseError::config("mysql requires a host"))
            }
            _ => Ok(()),
        }
    }

    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_ssl_mode(mut self, ssl_mode: impl Into<String>) -> Self {
        self.ssl_mode = ssl_mode.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_log_sql(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    /// Set pool limits: max open, max idle and max connection lifetime
    pub fn with_pool_limits(
        mut self,
        max_open: u32,
        max_idle: u32,
        max_lifetime: Option<Duration>,
    ) -> Self {
        self.max_open_conns = max_open;
        self.max_idle_conns = max_idle;
        self.conn_max_lifetime = max_lifetime;
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn with_connection_url(mut self, url: impl Into<String>) -> Self {
        self.connection_url = url.into();
        self
    }

    pub fn with_sync_and_migrate(mut self, enabled: bool) -> Self {
        self.sync_and_migrate = enabled;
        self
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        DatabaseError::config(format!(
            "{}{}: invalid number '{}'",
            ENV_PREFIX, key, value
        ))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        _ => Err(DatabaseError::config(format!(
            "{}{}: invalid boolean '{}'",
            ENV_PREFIX, key, value
        ))),
    }
}

/// Parse a duration such as `90s`, `1h30m`, `250ms` or a bare number of seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += Duration::from_nanos((amount * nanos_per_unit) as u64);
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.driver, Driver::Sqlite3);
        assert_eq!(config.username, "root");
        assert_eq!(config.password, "root");
        assert_eq!(config.name, "db");
        assert_eq!(config.host, "localhost:3306");
        assert_eq!(config.ssl_mode, "disable");
        assert_eq!(config.path, PathBuf::from("data/db/test.db"));
        assert_eq!(config.schema, "public");
        assert_eq!(config.timeout, 500);
        assert_eq!(config.max_idle_conns, 2);
        assert_eq!(config.charset, "utf8");
        assert!(config.sync_and_migrate);
        assert!(config.connection_url.is_empty());
    }

    #[test]
    fn test_from_env_overrides() {
        let config = Config::from_env_with(lookup(&[
            ("DRIVER", "postgres"),
            ("HOST", "db.example.com:5433"),
            ("MAX_OPEN_CONNS", "20"),
            ("LOG_SQL", "true"),
            ("CONN_MAX_LIFE_TIME", "1h30m"),
            ("SYNC_AND_MIGRATE", "false"),
        ]))
        .unwrap();

        assert_eq!(config.driver, Driver::Postgres);
        assert_eq!(config.host, "db.example.com:5433");
        assert_eq!(config.max_open_conns, 20);
        assert!(config.log_sql);
        assert_eq!(config.conn_max_lifetime, Some(Duration::from_secs(5400)));
        assert!(!config.sync_and_migrate);
        // Untouched values keep their defaults
        assert_eq!(config.username, "root");
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        let err = Config::from_env_with(lookup(&[("DRIVER", "oracle")])).unwrap_err();
        assert!(matches!(err, DatabaseError::UnsupportedDriver(ref d) if d == "oracle"));

        let err = Config::from_env_with(lookup(&[("TIMEOUT", "soon")])).unwrap_err();
        assert!(err.to_string().contains("APP_DATABASE_TIMEOUT"));

        let err = Config::from_env_with(lookup(&[("LOG_SQL", "maybe")])).unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10 parsecs"), None);
        assert_eq!(parse_duration("m"), None);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::default().with_path("").validate().is_err());
        assert!(Config::new(Driver::Mysql).with_host("").validate().is_err());
        assert!(Config::new(Driver::Mysql)
            .with_host("")
            .with_connection_url("root@tcp(localhost)/db")
            .validate()
            .is_ok());
    }
}
