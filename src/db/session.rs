//! Request-scoped sessions.
//!
//! A [`Session`] owns one pooled connection, optionally inside a transaction. It is
//! released exactly once: explicitly through [`Session::close`], which consumes it, or
//! implicitly on drop (including panics and cancelled futures). An uncommitted
//! transaction is rolled back on release.

use crate::db::pool::{DbConnection, DbTransaction, Engine};
use crate::error::{DbError, DbResult};
use crate::models::BackendType;
use sqlx::{Decode, MySql, Postgres, Sqlite, Type};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// A session the unit of work can drive to a transaction boundary.
pub trait TransactionalSession: Send {
    /// Identifier used in logs and errors.
    fn id(&self) -> &str;

    /// Commit the open transaction.
    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Release the session.
    fn close(self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Produces transactional sessions for a unit of work.
pub trait SessionFactory: Send + Sync {
    type Session: TransactionalSession;

    fn open_transactional(&self) -> impl Future<Output = DbResult<Self::Session>> + Send;
}

enum SessionHandle {
    Connection(DbConnection),
    Transaction(DbTransaction),
}

pub struct Session {
    id: String,
    backend: BackendType,
    handle: Option<SessionHandle>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("in_transaction", &self.in_transaction())
            .field("released", &self.handle.is_none())
            .finish()
    }
}

impl Session {
    fn new(backend: BackendType, handle: SessionHandle) -> Self {
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            backend,
            handle: Some(handle),
        };
        debug!(
            session_id = %session.id,
            backend = %backend,
            transactional = session.in_transaction(),
            "Session opened"
        );
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// Whether the session holds an open transaction.
    pub fn in_transaction(&self) -> bool {
        matches!(self.handle, Some(SessionHandle::Transaction(_)))
    }

    fn handle_mut(&mut self) -> DbResult<&mut SessionHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| DbError::invalid_state("use the session", "released"))
    }

    /// Execute a statement and return the number of rows affected.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let rows_affected = match self.handle_mut()? {
            SessionHandle::Connection(conn) => impl_db_dispatch!(DbConnection, conn, c => {
                sqlx::query(sql).execute(&mut **c).await?.rows_affected()
            }),
            SessionHandle::Transaction(tx) => impl_db_dispatch!(DbTransaction, tx, t => {
                sqlx::query(sql).execute(&mut **t).await?.rows_affected()
            }),
        };

        debug!(session_id = %self.id, rows_affected, "Executed statement");
        Ok(rows_affected)
    }

    /// Fetch the first column of the first row.
    pub async fn fetch_scalar<T>(&mut self, sql: &str) -> DbResult<T>
    where
        T: Send + Unpin,
        T: for<'r> Decode<'r, MySql> + Type<MySql>,
        T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
        T: for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
    {
        let value = match self.handle_mut()? {
            SessionHandle::Connection(conn) => impl_db_dispatch!(DbConnection, conn, c => {
                sqlx::query_scalar::<_, T>(sql).fetch_one(&mut **c).await?
            }),
            SessionHandle::Transaction(tx) => impl_db_dispatch!(DbTransaction, tx, t => {
                sqlx::query_scalar::<_, T>(sql).fetch_one(&mut **t).await?
            }),
        };
        Ok(value)
    }

    /// Commit the open transaction. The connection goes back to the pool.
    pub async fn commit(&mut self) -> DbResult<()> {
        let tx = self.take_transaction("commit")?;
        tx.commit().await.map_err(|e| {
            DbError::transaction(format!("commit failed: {}", e), self.id.clone())
        })?;
        debug!(session_id = %self.id, "Transaction committed");
        Ok(())
    }

    /// Roll back the open transaction. The connection goes back to the pool.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let tx = self.take_transaction("rollback")?;
        tx.rollback().await.map_err(|e| {
            DbError::transaction(format!("rollback failed: {}", e), self.id.clone())
        })?;
        debug!(session_id = %self.id, "Transaction rolled back");
        Ok(())
    }

    fn take_transaction(&mut self, operation: &str) -> DbResult<DbTransaction> {
        match self.handle.take() {
            Some(SessionHandle::Transaction(tx)) => Ok(tx),
            other => {
                let state = match &other {
                    Some(_) => "outside a transaction",
                    None => "released",
                };
                self.handle = other;
                Err(DbError::invalid_state(operation, state))
            }
        }
    }

    /// Release the session, rolling back any transaction still open.
    pub async fn close(mut self) -> DbResult<()> {
        let result = match self.handle.take() {
            Some(SessionHandle::Transaction(tx)) => tx.rollback().await.map_err(|e| {
                DbError::transaction(format!("rollback on close failed: {}", e), self.id.clone())
            }),
            Some(SessionHandle::Connection(conn)) => {
                drop(conn);
                Ok(())
            }
            None => Ok(()),
        };
        debug!(session_id = %self.id, "Session closed");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // sqlx rolls back a dropped transaction and returns dropped connections to
        // the pool on its own.
        if let Some(handle) = self.handle.take() {
            debug!(
                session_id = %self.id,
                in_transaction = matches!(handle, SessionHandle::Transaction(_)),
                "Session released via Drop"
            );
        }
    }
}

impl TransactionalSession for Session {
    fn id(&self) -> &str {
        &self.id
    }

    async fn commit(&mut self) -> DbResult<()> {
        Session::commit(self).await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        Session::rollback(self).await
    }

    async fn close(self) -> DbResult<()> {
        Session::close(self).await
    }
}

/// Session factory bound to one engine.
#[derive(Debug, Clone)]
pub struct SessionMaker {
    engine: Arc<Engine>,
}

impl SessionMaker {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Open a session on a plain pooled connection.
    pub async fn open(&self) -> DbResult<Session> {
        let conn = self.engine.acquire().await?;
        Ok(Session::new(
            self.engine.backend(),
            SessionHandle::Connection(conn),
        ))
    }

    /// Open a session inside a fresh transaction.
    pub async fn open_transactional(&self) -> DbResult<Session> {
        let tx = self.engine.begin().await?;
        Ok(Session::new(
            self.engine.backend(),
            SessionHandle::Transaction(tx),
        ))
    }
}

impl SessionFactory for SessionMaker {
    type Session = Session;

    async fn open_transactional(&self) -> DbResult<Session> {
        SessionMaker::open_transactional(self).await
    }
}
