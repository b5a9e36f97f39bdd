//! Sessions: one pooled connection with transaction state
//!
//! A [`Session`] keeps the same physical connection for its whole lifetime, so
//! statements issued between `begin` and `commit` share one transaction.
//!
//! # Example
//!
//! ```ignore
//! let mut session = engine.new_session().await?;
//! session.begin().await?;
//! session.insert(&user).await?;
//! session.commit().await?;
//! ```

use super::database::Connection;
use super::engine::{count_from, Engine, Executor};
use super::error::{DatabaseError, Result};
use super::schema::{self, Entity, TableDescriptor};
use super::value::{DatabaseResult, DatabaseValue};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Transaction state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    InTransaction,
}

/// A connection checked out of an engine's pool
///
/// Dropping a session returns its connection to the pool. If a transaction is
/// still open the connection is closed instead, which makes the database roll
/// the transaction back.
pub struct Session {
    engine: Engine,
    conn: Option<Box<dyn Connection>>,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(engine: Engine, conn: Box<dyn Connection>) -> Self {
        Self {
            engine,
            conn: Some(conn),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn in_transaction(&self) -> bool {
        self.state == SessionState::InTransaction
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn conn(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| DatabaseError::transaction("session is closed"))
    }

    /// Begin a transaction
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open or the statement fails
    pub async fn begin(&mut self) -> Result<()> {
        if self.in_transaction() {
            return Err(DatabaseError::transaction("transaction already in progress"));
        }
        let sql = self.engine.dialect().begin_sql();
        let engine = self.engine.clone();
        engine.run_execute(self.conn()?.as_mut(), sql, &[]).await?;
        self.state = SessionState::InTransaction;
        Ok(())
    }

    /// Commit the open transaction
    ///
    /// On failure the session stays in the transaction, so dropping it
    /// discards the connection.
    pub async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Err(DatabaseError::transaction("no transaction in progress"));
        }
        let sql = self.engine.dialect().commit_sql();
        let engine = self.engine.clone();
        engine.run_execute(self.conn()?.as_mut(), sql, &[]).await?;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Roll back the open transaction
    pub async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Err(DatabaseError::transaction("no transaction in progress"));
        }
        let sql = self.engine.dialect().rollback_sql();
        let engine = self.engine.clone();
        engine.run_execute(self.conn()?.as_mut(), sql, &[]).await?;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Release the connection, rolling back an open transaction first
    pub async fn close(mut self) -> Result<()> {
        if self.in_transaction() {
            self.rollback().await?;
        }
        self.conn.take();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.state == SessionState::InTransaction {
                warn!(
                    driver = %self.engine.driver(),
                    "Session dropped inside a transaction, discarding connection"
                );
                conn.discard();
            } else {
                debug!("Session released");
            }
        }
    }
}

#[async_trait]
impl Executor for Session {
    async fn exec(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64> {
        let engine = self.engine.clone();
        engine.run_execute(self.conn()?.as_mut(), sql, params).await
    }

    async fn query(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let engine = self.engine.clone();
        engine.run_query(self.conn()?.as_mut(), sql, params).await
    }

    async fn insert(&mut self, entity: &dyn Entity) -> Result<u64> {
        let (sql, params) = schema::insert_statement(&self.engine, entity)?;
        self.exec(&sql, &params).await
    }

    async fn delete(&mut self, entity: &dyn Entity) -> Result<u64> {
        let (sql, params) = schema::delete_statement(&self.engine, entity)?;
        self.exec(&sql, &params).await
    }

    async fn count(&mut self, table: &TableDescriptor) -> Result<u64> {
        let sql = schema::count_sql(&self.engine, table);
        let rows = self.query(&sql, &[]).await?;
        count_from(rows)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::core::engine::test_support::memory_engine;

    #[tokio::test]
    async fn test_transaction_state() {
        let engine = memory_engine().await;
        let mut session = engine.new_session().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        assert!(session.commit().await.is_err());
        session.begin().await.unwrap();
        assert!(session.in_transaction());
        assert!(session.begin().await.is_err());
        session.rollback().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let engine = memory_engine().await;
        engine
            .exec("CREATE TABLE notes (body TEXT)", &[])
            .await
            .unwrap();

        let mut session = engine.new_session().await.unwrap();
        session.begin().await.unwrap();
        session
            .exec("INSERT INTO notes (body) VALUES (?)", &["draft".into()])
            .await
            .unwrap();
        session.rollback().await.unwrap();

        let rows = session
            .query("SELECT COUNT(*) AS count FROM notes", &[])
            .await
            .unwrap();
        assert_eq!(count_from(rows).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drop_in_transaction_releases_slot() {
        let engine = memory_engine().await;
        {
            let mut session = engine.new_session().await.unwrap();
            session.begin().await.unwrap();
        }
        // The pool slot is free again
        engine.ping().await.unwrap();
    }
}
