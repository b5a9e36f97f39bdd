//! Table descriptors and schema synchronization
//!
//! Tables are described in code with object-style names (`AccessToken`,
//! `UserID`). The engine's name mapper turns them into database identifiers,
//! and [`sync_tables`] reconciles the descriptors with the live schema:
//! missing tables are created, missing columns added and missing indexes
//! built. Nothing is ever dropped.

use super::database_types::Driver;
use super::engine::Engine;
use super::error::{DatabaseError, Result};
use super::value::{DatabaseResult, DatabaseValue};
use std::collections::HashSet;
use tracing::{debug, info};

/// Abstract column type, spelled per driver by the dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    BigInt,
    Bool,
    Double,
    /// Bounded string
    Varchar(u32),
    Text,
    Blob,
}

/// One column of a table descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Object-style column name
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Build a plain index on this column
    pub indexed: bool,
    /// Build a unique index on this column
    pub unique: bool,
    /// SQL literal used as the column default
    pub default: Option<String>,
}

impl ColumnDescriptor {
    /// A non-null column without keys or indexes
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            indexed: false,
            unique: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(sql.into());
        self
    }
}

/// Declarative description of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Append a column
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Object-style table name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

/// A row value bound to a table descriptor
///
/// `values()` returns one value per descriptor column, in column order.
pub trait Entity: Send + Sync {
    fn descriptor(&self) -> &TableDescriptor;
    fn values(&self) -> Vec<DatabaseValue>;
}

/// Index name for a column: `IDX_<table>_<column>` or `UQE_<table>_<column>`
pub fn index_name(table: &str, column: &str, unique: bool) -> String {
    let prefix = if unique { "UQE" } else { "IDX" };
    format!("{}_{}_{}", prefix, table, column)
}

/// Synchronize table descriptors into the live schema
///
/// Idempotent: running it twice against the same schema issues no DDL the
/// second time.
pub async fn sync_tables(engine: &Engine, tables: &[TableDescriptor]) -> Result<()> {
    for table in tables {
        sync_table(engine, table).await?;
    }
    Ok(())
}

async fn sync_table(engine: &Engine, table: &TableDescriptor) -> Result<()> {
    let dialect = engine.dialect();
    let table_name = engine.map_name(table.name());

    let (sql, params) = dialect.table_exists_query(engine.schema(), &table_name);
    let exists = !engine.query(&sql, &params).await?.is_empty();

    if exists {
        let (sql, params) = dialect.columns_query(engine.schema(), &table_name);
        let existing = names_of(engine.query(&sql, &params).await?);

        for column in table.columns() {
            let column_name = engine.map_name(&column.name);
            if existing.contains(&column_name.to_lowercase()) {
                continue;
            }
            // NOT NULL without a default cannot be added to a populated table
            let mut desc = column.clone();
            if desc.default.is_none() {
                desc.nullable = true;
            }
            desc.primary_key = false;
            let sql = format!(
                "ALTER TABLE {} {} {}",
                engine.table_name(table.name()),
                dialect.add_column_keyword(),
                dialect.column_definition(&column_name, &desc, false)
            );
            engine.exec(&sql, &[]).await?;
            info!(table = %table_name, column = %column_name, "Added column");
        }
    } else {
        engine.exec(&create_table_sql(engine, table), &[]).await?;
        info!(table = %table_name, "Created table");
    }

    let (sql, params) = dialect.indexes_query(engine.schema(), &table_name);
    let existing = names_of(engine.query(&sql, &params).await?);

    for column in table.columns() {
        if !(column.indexed || column.unique) || column.primary_key {
            continue;
        }
        let column_name = engine.map_name(&column.name);
        let name = index_name(&table_name, &column_name, column.unique);
        if existing.contains(&name.to_lowercase()) {
            debug!(index = %name, "Index already present");
            continue;
        }
        let sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if column.unique { "UNIQUE " } else { "" },
            dialect.quote(&name),
            engine.table_name(table.name()),
            dialect.quote(&column_name)
        );
        engine.exec(&sql, &[]).await?;
        info!(table = %table_name, index = %name, "Created index");
    }

    Ok(())
}

fn names_of(rows: DatabaseResult) -> HashSet<String> {
    rows.iter()
        .filter_map(|row| row.get("name"))
        .filter(|value| !value.is_null())
        .map(|value| value.as_string().to_lowercase())
        .collect()
}

/// CREATE TABLE statement for a descriptor
pub fn create_table_sql(engine: &Engine, table: &TableDescriptor) -> String {
    let dialect = engine.dialect();
    let pk_count = table.primary_keys().count();

    let mut defs: Vec<String> = table
        .columns()
        .iter()
        .map(|column| {
            dialect.column_definition(
                &engine.map_name(&column.name),
                column,
                pk_count == 1 && column.primary_key,
            )
        })
        .collect();

    if pk_count > 1 {
        let keys: Vec<String> = table
            .primary_keys()
            .map(|c| dialect.quote(&engine.map_name(&c.name)))
            .collect();
        defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    format!(
        "CREATE TABLE {} ({}){}",
        engine.table_name(table.name()),
        defs.join(", "),
        dialect.table_options()
    )
}

fn checked_values(entity: &dyn Entity) -> Result<Vec<DatabaseValue>> {
    let values = entity.values();
    let expected = entity.descriptor().columns().len();
    if values.len() != expected {
        return Err(DatabaseError::query(format!(
            "{}: expected {} values, got {}",
            entity.descriptor().name(),
            expected,
            values.len()
        )));
    }
    Ok(values)
}

/// INSERT statement and parameters for an entity
///
/// An auto-increment primary key holding NULL or zero is left out so the
/// database assigns it.
pub fn insert_statement(
    engine: &Engine,
    entity: &dyn Entity,
) -> Result<(String, Vec<DatabaseValue>)> {
    let dialect = engine.dialect();
    let table = entity.descriptor();
    let values = checked_values(entity)?;

    let mut columns = Vec::with_capacity(values.len());
    let mut params = Vec::with_capacity(values.len());
    for (column, value) in table.columns().iter().zip(values) {
        if column.primary_key && column.auto_increment && value.is_unset() {
            continue;
        }
        columns.push(dialect.quote(&engine.map_name(&column.name)));
        params.push(value);
    }

    let table_name = engine.table_name(table.name());
    if columns.is_empty() {
        let sql = match dialect.driver() {
            Driver::Mysql => format!("INSERT INTO {} () VALUES ()", table_name),
            _ => format!("INSERT INTO {} DEFAULT VALUES", table_name),
        };
        return Ok((sql, params));
    }

    let placeholders: Vec<String> = (1..=params.len()).map(|n| dialect.placeholder(n)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_name,
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok((sql, params))
}

/// DELETE statement and parameters for an entity
///
/// Conditions are the non-NULL primary-key values, or every non-NULL value
/// when no primary key is set.
pub fn delete_statement(
    engine: &Engine,
    entity: &dyn Entity,
) -> Result<(String, Vec<DatabaseValue>)> {
    let dialect = engine.dialect();
    let table = entity.descriptor();
    let values = checked_values(entity)?;

    let pairs: Vec<(&str, DatabaseValue)> = table
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .zip(values)
        .collect();

    let keyed: Vec<(&str, &DatabaseValue)> = pairs
        .iter()
        .zip(table.columns())
        .filter(|((_, value), column)| column.primary_key && !value.is_null())
        .map(|((name, value), _)| (*name, value))
        .collect();

    let conditions = if keyed.is_empty() {
        pairs
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (*name, value))
            .collect()
    } else {
        keyed
    };

    if conditions.is_empty() {
        return Err(DatabaseError::NoCondition(engine.map_name(table.name())));
    }

    let clauses: Vec<String> = conditions
        .iter()
        .enumerate()
        .map(|(i, (name, _))| {
            format!(
                "{} = {}",
                dialect.quote(&engine.map_name(name)),
                dialect.placeholder(i + 1)
            )
        })
        .collect();
    let params = conditions.into_iter().map(|(_, v)| v.clone()).collect();

    let sql = format!(
        "DELETE FROM {} WHERE {}",
        engine.table_name(table.name()),
        clauses.join(" AND ")
    );
    Ok((sql, params))
}

/// COUNT statement for a table
pub fn count_sql(engine: &Engine, table: &TableDescriptor) -> String {
    format!(
        "SELECT COUNT(*) AS count FROM {}",
        engine.table_name(table.name())
    )
}
