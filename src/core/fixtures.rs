//! Test fixtures
//!
//! A fixtures directory holds one `<table>.json` file per table, each an array
//! of objects mapping column names to values:
//!
//! ```json
//! [
//!   {"id": 1, "uid": 7, "token": "abc"},
//!   {"id": 2, "uid": 8, "token": null}
//! ]
//! ```
//!
//! Loading empties every fixture table and inserts its rows, all in one
//! transaction. Tables without a file are left alone.

use super::bootstrap::new_engine;
use super::config::Config;
use super::engine::{Engine, Executor};
use super::error::{DatabaseError, Result};
use super::registry::Registry;
use super::session::Session;
use super::value::DatabaseValue;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rows of one fixture file
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub table: String,
    pub path: PathBuf,
    pub rows: Vec<Map<String, Value>>,
}

impl Fixture {
    /// Read a fixture file; the table name is the file stem
    pub async fn read(path: &Path) -> Result<Self> {
        let table = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| fixture_error(path, "file name is not a table name"))?
            .to_string();

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| fixture_error(path, e))?;
        let rows: Vec<Map<String, Value>> =
            serde_json::from_str(&text).map_err(|e| fixture_error(path, e))?;

        Ok(Self {
            table,
            path: path.to_path_buf(),
            rows,
        })
    }
}

fn fixture_error(path: &Path, message: impl ToString) -> DatabaseError {
    DatabaseError::Fixture {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Loads a fixtures directory into an engine's database
#[derive(Debug, Clone)]
pub struct FixtureLoader {
    engine: Engine,
    dir: PathBuf,
}

impl FixtureLoader {
    pub fn new(engine: Engine, dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fixture files of the directory, sorted by table name
    pub async fn fixtures(&self) -> Result<Vec<Fixture>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| fixture_error(&self.dir, e))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fixture_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut fixtures = Vec::with_capacity(paths.len());
        for path in paths {
            fixtures.push(Fixture::read(&path).await?);
        }
        Ok(fixtures)
    }

    /// Replace the contents of every fixture table
    ///
    /// Returns the number of rows inserted. On any failure the transaction is
    /// rolled back and the database is left as it was.
    pub async fn load(&self) -> Result<usize> {
        let fixtures = self.fixtures().await?;

        let mut session = self.engine.new_session().await?;
        session.begin().await?;
        match self.load_into(&mut session, &fixtures).await {
            Ok(inserted) => {
                session.commit().await?;
                session.close().await?;
                info!(
                    tables = fixtures.len(),
                    rows = inserted,
                    dir = %self.dir.display(),
                    "Fixtures loaded"
                );
                Ok(inserted)
            }
            Err(e) => {
                let _ = session.rollback().await;
                Err(e)
            }
        }
    }

    async fn load_into(&self, session: &mut Session, fixtures: &[Fixture]) -> Result<usize> {
        let dialect = self.engine.dialect();
        let mut inserted = 0;

        for fixture in fixtures {
            let table = dialect.table_name(self.engine.schema(), &fixture.table);
            session.exec(&format!("DELETE FROM {}", table), &[]).await?;

            for row in &fixture.rows {
                let mut columns: Vec<&String> = row.keys().collect();
                columns.sort();

                let names: Vec<String> = columns.iter().map(|c| dialect.quote(c)).collect();
                let placeholders: Vec<String> =
                    (1..=columns.len()).map(|n| dialect.placeholder(n)).collect();
                let params: Vec<DatabaseValue> =
                    columns.iter().map(|c| DatabaseValue::from(&row[c.as_str()])).collect();

                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    names.join(", "),
                    placeholders.join(", ")
                );
                session
                    .exec(&sql, &params)
                    .await
                    .map_err(|e| fixture_error(&fixture.path, e))?;
                inserted += 1;
            }
            debug!(table = %fixture.table, rows = fixture.rows.len(), "Fixture table loaded");
        }

        Ok(inserted)
    }
}

/// Bootstrap an engine and prepare a fixture loader for it
///
/// Fixtures are not loaded yet; call [`FixtureLoader::load`] before each
/// test that needs a known database state.
pub async fn create_test_engine(
    config: &Config,
    registry: &Registry,
    fixtures_dir: impl Into<PathBuf>,
) -> Result<(Engine, FixtureLoader)> {
    let engine = new_engine(config, registry).await?;
    let loader = FixtureLoader::new(engine.clone(), fixtures_dir);
    Ok((engine, loader))
}
