//! Database driver definitions
//!
//! This module defines the dialects supported by the bootstrap layer and which of
//! them were compiled into the current build.

use super::error::DatabaseError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// MySQL/MariaDB
    Mysql,
    /// PostgreSQL
    Postgres,
    /// Microsoft SQL Server
    Mssql,
    /// SQLite 3
    #[default]
    Sqlite3,
}

impl Driver {
    /// All drivers, in a stable order
    pub const ALL: [Driver; 4] = [
        Driver::Mysql,
        Driver::Postgres,
        Driver::Mssql,
        Driver::Sqlite3,
    ];

    /// Canonical driver name
    pub fn to_str(&self) -> &'static str {
        match self {
            Driver::Mysql => "mysql",
            Driver::Postgres => "postgres",
            Driver::Mssql => "mssql",
            Driver::Sqlite3 => "sqlite3",
        }
    }

    /// Whether the driver talks to a server over the network
    pub fn is_networked(&self) -> bool {
        !matches!(self, Driver::Sqlite3)
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for Driver {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(Driver::Mysql),
            "postgres" => Ok(Driver::Postgres),
            "mssql" => Ok(Driver::Mssql),
            "sqlite3" => Ok(Driver::Sqlite3),
            _ => Err(DatabaseError::UnsupportedDriver(s.to_string())),
        }
    }
}

/// Which drivers are usable in this build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSupport {
    pub mysql: bool,
    pub postgres: bool,
    pub mssql: bool,
    pub sqlite3: bool,
}

impl DriverSupport {
    /// Drivers enabled through cargo features
    pub const fn compiled() -> Self {
        Self {
            mysql: cfg!(feature = "mysql"),
            postgres: cfg!(feature = "postgres"),
            mssql: cfg!(feature = "mssql"),
            sqlite3: cfg!(feature = "sqlite"),
        }
    }

    /// No driver enabled
    pub const fn none() -> Self {
        Self {
            mysql: false,
            postgres: false,
            mssql: false,
            sqlite3: false,
        }
    }

    /// Copy of `self` with one driver switched on or off
    pub fn with(mut self, driver: Driver, enabled: bool) -> Self {
        match driver {
            Driver::Mysql => self.mysql = enabled,
            Driver::Postgres => self.postgres = enabled,
            Driver::Mssql => self.mssql = enabled,
            Driver::Sqlite3 => self.sqlite3 = enabled,
        }
        self
    }

    /// Check whether a driver is enabled
    pub fn supports(&self, driver: Driver) -> bool {
        match driver {
            Driver::Mysql => self.mysql,
            Driver::Postgres => self.postgres,
            Driver::Mssql => self.mssql,
            Driver::Sqlite3 => self.sqlite3,
        }
    }

    /// Fail with `CapabilityDisabled` when the driver is off
    pub fn require(&self, driver: Driver) -> Result<(), DatabaseError> {
        if self.supports(driver) {
            Ok(())
        } else {
            Err(DatabaseError::CapabilityDisabled { driver })
        }
    }
}

impl Default for DriverSupport {
    fn default() -> Self {
        Self::compiled()
    }
}
