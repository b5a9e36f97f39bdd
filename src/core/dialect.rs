//! Per-driver SQL grammar
//!
//! The engine stays driver agnostic by asking its [`Dialect`] how to quote
//! identifiers, number placeholders, open transactions, spell column types
//! and introspect the live schema.

use super::database_types::Driver;
use super::schema::{ColumnDescriptor, ColumnType};
use super::value::DatabaseValue;
use std::collections::BTreeMap;

/// Dialect parameter selecting the mysql row format for new tables
pub const PARAM_ROW_FORMAT: &str = "rowFormat";
/// Dialect parameter selecting the sqlite transaction locking mode
pub const PARAM_TXLOCK: &str = "txlock";

/// Placeholder numbering style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Dollar,
    /// `@P1`, `@P2`, ...
    AtP,
}

/// SQL grammar for one driver plus its string parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    driver: Driver,
    params: BTreeMap<String, String>,
}

impl Dialect {
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            params: BTreeMap::new(),
        }
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// Set a dialect parameter
    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn placeholder_style(&self) -> Placeholder {
        match self.driver {
            Driver::Postgres => Placeholder::Dollar,
            Driver::Mssql => Placeholder::AtP,
            Driver::Mysql | Driver::Sqlite3 => Placeholder::Question,
        }
    }

    /// Placeholder for the `n`-th parameter (1-based)
    pub fn placeholder(&self, n: usize) -> String {
        match self.placeholder_style() {
            Placeholder::Question => "?".to_string(),
            Placeholder::Dollar => format!("${}", n),
            Placeholder::AtP => format!("@P{}", n),
        }
    }

    /// Quote an identifier, doubling any embedded closing quote
    pub fn quote(&self, ident: &str) -> String {
        match self.driver {
            Driver::Mysql => format!("`{}`", ident.replace('`', "``")),
            Driver::Mssql => format!("[{}]", ident.replace(']', "]]")),
            Driver::Postgres | Driver::Sqlite3 => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quoted table name, qualified by `schema` on postgres
    pub fn table_name(&self, schema: &str, table: &str) -> String {
        if self.driver == Driver::Postgres && !schema.is_empty() {
            format!("{}.{}", self.quote(schema), self.quote(table))
        } else {
            self.quote(table)
        }
    }

    pub fn begin_sql(&self) -> &'static str {
        match self.driver {
            Driver::Mysql => "START TRANSACTION",
            Driver::Postgres => "BEGIN",
            Driver::Mssql => "BEGIN TRANSACTION",
            Driver::Sqlite3 => match self.param(PARAM_TXLOCK) {
                Some(lock) if lock.eq_ignore_ascii_case("immediate") => "BEGIN IMMEDIATE",
                Some(lock) if lock.eq_ignore_ascii_case("exclusive") => "BEGIN EXCLUSIVE",
                _ => "BEGIN",
            },
        }
    }

    pub fn commit_sql(&self) -> &'static str {
        match self.driver {
            Driver::Mssql => "COMMIT TRANSACTION",
            _ => "COMMIT",
        }
    }

    pub fn rollback_sql(&self) -> &'static str {
        match self.driver {
            Driver::Mssql => "ROLLBACK TRANSACTION",
            _ => "ROLLBACK",
        }
    }

    /// Column type as spelled in DDL
    pub fn column_type(&self, ty: ColumnType) -> String {
        match (self.driver, ty) {
            (Driver::Sqlite3, ColumnType::Int | ColumnType::BigInt | ColumnType::Bool) => {
                "INTEGER".to_string()
            }
            (Driver::Sqlite3, ColumnType::Double) => "REAL".to_string(),
            (Driver::Sqlite3, ColumnType::Varchar(_) | ColumnType::Text) => "TEXT".to_string(),
            (Driver::Sqlite3, ColumnType::Blob) => "BLOB".to_string(),

            (Driver::Postgres, ColumnType::Int) => "INTEGER".to_string(),
            (Driver::Postgres, ColumnType::BigInt) => "BIGINT".to_string(),
            (Driver::Postgres, ColumnType::Bool) => "BOOL".to_string(),
            (Driver::Postgres, ColumnType::Double) => "DOUBLE PRECISION".to_string(),
            (Driver::Postgres, ColumnType::Varchar(n)) => format!("VARCHAR({})", n),
            (Driver::Postgres, ColumnType::Text) => "TEXT".to_string(),
            (Driver::Postgres, ColumnType::Blob) => "BYTEA".to_string(),

            (Driver::Mysql, ColumnType::Int) => "INT".to_string(),
            (Driver::Mysql, ColumnType::BigInt) => "BIGINT".to_string(),
            (Driver::Mysql, ColumnType::Bool) => "TINYINT(1)".to_string(),
            (Driver::Mysql, ColumnType::Double) => "DOUBLE".to_string(),
            (Driver::Mysql, ColumnType::Varchar(n)) => format!("VARCHAR({})", n),
            (Driver::Mysql, ColumnType::Text) => "TEXT".to_string(),
            (Driver::Mysql, ColumnType::Blob) => "LONGBLOB".to_string(),

            (Driver::Mssql, ColumnType::Int) => "INT".to_string(),
            (Driver::Mssql, ColumnType::BigInt) => "BIGINT".to_string(),
            (Driver::Mssql, ColumnType::Bool) => "BIT".to_string(),
            (Driver::Mssql, ColumnType::Double) => "FLOAT".to_string(),
            (Driver::Mssql, ColumnType::Varchar(n)) => format!("NVARCHAR({})", n),
            (Driver::Mssql, ColumnType::Text) => "NVARCHAR(MAX)".to_string(),
            (Driver::Mssql, ColumnType::Blob) => "VARBINARY(MAX)".to_string(),
        }
    }

    /// Column definition for CREATE TABLE / ALTER TABLE
    ///
    /// `column` is the already-mapped column name. `inline_pk` marks the sole
    /// primary key column of a table.
    pub fn column_definition(
        &self,
        column: &str,
        desc: &ColumnDescriptor,
        inline_pk: bool,
    ) -> String {
        let name = self.quote(column);

        if inline_pk && desc.auto_increment {
            return match self.driver {
                Driver::Sqlite3 => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name),
                Driver::Postgres if desc.ty == ColumnType::Int => {
                    format!("{} SERIAL PRIMARY KEY", name)
                }
                Driver::Postgres => format!("{} BIGSERIAL PRIMARY KEY", name),
                Driver::Mysql => format!(
                    "{} {} PRIMARY KEY AUTO_INCREMENT",
                    name,
                    self.column_type(desc.ty)
                ),
                Driver::Mssql => format!(
                    "{} {} IDENTITY(1,1) PRIMARY KEY",
                    name,
                    self.column_type(desc.ty)
                ),
            };
        }

        let mut def = format!("{} {}", name, self.column_type(desc.ty));
        if !desc.nullable || desc.primary_key {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &desc.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        if inline_pk {
            def.push_str(" PRIMARY KEY");
        }
        def
    }

    /// Suffix appended to CREATE TABLE
    pub fn table_options(&self) -> String {
        match (self.driver, self.param(PARAM_ROW_FORMAT)) {
            (Driver::Mysql, Some(format)) => {
                format!(" ENGINE=InnoDB ROW_FORMAT={}", format.to_uppercase())
            }
            (Driver::Mysql, None) => " ENGINE=InnoDB".to_string(),
            _ => String::new(),
        }
    }

    /// ALTER TABLE clause adding a column
    pub fn add_column_keyword(&self) -> &'static str {
        match self.driver {
            Driver::Mssql => "ADD",
            _ => "ADD COLUMN",
        }
    }

    /// Query listing a table by name; yields a `name` column
    pub fn table_exists_query(&self, schema: &str, table: &str) -> (String, Vec<DatabaseValue>) {
        match self.driver {
            Driver::Sqlite3 => (
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?".to_string(),
                vec![table.into()],
            ),
            Driver::Postgres => (
                "SELECT tablename::text AS name FROM pg_tables WHERE schemaname = $1 AND tablename = $2"
                    .to_string(),
                vec![pg_schema(schema).into(), table.into()],
            ),
            Driver::Mysql => (
                "SELECT TABLE_NAME AS name FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?"
                    .to_string(),
                vec![table.into()],
            ),
            Driver::Mssql => (
                "SELECT TABLE_NAME AS name FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = @P1"
                    .to_string(),
                vec![table.into()],
            ),
        }
    }

    /// Query listing the columns of a table; yields a `name` column
    pub fn columns_query(&self, schema: &str, table: &str) -> (String, Vec<DatabaseValue>) {
        match self.driver {
            Driver::Sqlite3 => (
                "SELECT name FROM pragma_table_info(?)".to_string(),
                vec![table.into()],
            ),
            Driver::Postgres => (
                "SELECT column_name::text AS name FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2"
                    .to_string(),
                vec![pg_schema(schema).into(), table.into()],
            ),
            Driver::Mysql => (
                "SELECT COLUMN_NAME AS name FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?"
                    .to_string(),
                vec![table.into()],
            ),
            Driver::Mssql => (
                "SELECT COLUMN_NAME AS name FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = @P1"
                    .to_string(),
                vec![table.into()],
            ),
        }
    }

    /// Query listing the indexes of a table; yields a `name` column
    pub fn indexes_query(&self, schema: &str, table: &str) -> (String, Vec<DatabaseValue>) {
        match self.driver {
            Driver::Sqlite3 => (
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?".to_string(),
                vec![table.into()],
            ),
            Driver::Postgres => (
                "SELECT indexname::text AS name FROM pg_indexes WHERE schemaname = $1 AND tablename = $2"
                    .to_string(),
                vec![pg_schema(schema).into(), table.into()],
            ),
            Driver::Mysql => (
                "SELECT DISTINCT INDEX_NAME AS name FROM INFORMATION_SCHEMA.STATISTICS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?"
                    .to_string(),
                vec![table.into()],
            ),
            Driver::Mssql => (
                "SELECT name FROM sys.indexes WHERE object_id = OBJECT_ID(@P1) AND name IS NOT NULL"
                    .to_string(),
                vec![table.into()],
            ),
        }
    }
}

fn pg_schema(schema: &str) -> &str {
    if schema.is_empty() {
        "public"
    } else {
        schema
    }
}
