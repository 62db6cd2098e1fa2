//! Transactional unit of work.
//!
//! A [`UnitOfWork`] wraps exactly one transactional session and drives it through
//! `Idle -> Open -> Committing | RollingBack -> Closed`. A clean end commits, an end
//! carrying an error rolls back, and the session is closed on every path. `Closed`
//! is terminal.
//!
//! ```ignore
//! UnitOfWork::new()
//!     .await?
//!     .run(|session| {
//!         Box::pin(async move {
//!             session.execute("INSERT INTO audit (event) VALUES ('login')").await?;
//!             Ok::<_, DbError>(())
//!         })
//!     })
//!     .await?;
//! ```

use crate::db::engine::{self, EngineManager};
use crate::db::session::{SessionFactory, SessionMaker, TransactionalSession};
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Idle,
    Open,
    Committing,
    RollingBack,
    Closed,
}

impl std::fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Committing => "committing",
            Self::RollingBack => "rolling back",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub struct UnitOfWork<F: SessionFactory = SessionMaker> {
    factory: F,
    session: Option<F::Session>,
    state: UnitOfWorkState,
}

impl UnitOfWork<SessionMaker> {
    /// Unit of work on the process-wide engine.
    pub async fn new() -> DbResult<Self> {
        Ok(Self::with_factory(engine::get_session_factory().await?))
    }

    /// Unit of work on the given manager's engine.
    pub async fn from_manager(manager: &EngineManager) -> DbResult<Self> {
        Ok(Self::with_factory(manager.get_session_factory().await?))
    }
}

impl<F: SessionFactory> UnitOfWork<F> {
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            session: None,
            state: UnitOfWorkState::Idle,
        }
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    /// Open the session and its transaction.
    ///
    /// If opening fails the unit stays idle and `begin` may be retried.
    pub async fn begin(&mut self) -> DbResult<&mut F::Session> {
        if self.state != UnitOfWorkState::Idle {
            return Err(DbError::invalid_state("begin", self.state));
        }

        let session = self.factory.open_transactional().await?;
        debug!(session_id = %session.id(), "Unit of work opened");
        self.state = UnitOfWorkState::Open;
        Ok(self.session.insert(session))
    }

    /// The open session.
    pub fn session(&mut self) -> DbResult<&mut F::Session> {
        match (self.state, self.session.as_mut()) {
            (UnitOfWorkState::Open, Some(session)) => Ok(session),
            (state, _) => Err(DbError::invalid_state("use the session", state)),
        }
    }

    /// Finish the unit: commit when `error` is `None`, roll back otherwise.
    ///
    /// The session is closed whatever the commit or rollback outcome. A commit or
    /// rollback failure is returned in preference to a close failure.
    pub async fn end(&mut self, error: Option<&(dyn std::fmt::Display + Sync)>) -> DbResult<()> {
        if self.state != UnitOfWorkState::Open {
            return Err(DbError::invalid_state("end", self.state));
        }
        let Some(mut session) = self.session.take() else {
            return Err(DbError::invalid_state("end", "without a session"));
        };

        let outcome = match error {
            None => {
                self.state = UnitOfWorkState::Committing;
                session.commit().await
            }
            Some(cause) => {
                self.state = UnitOfWorkState::RollingBack;
                warn!(session_id = %session.id(), error = %cause, "Rolling back unit of work");
                session.rollback().await
            }
        };

        let closed = session.close().await;
        self.state = UnitOfWorkState::Closed;
        debug!("Unit of work closed");

        outcome?;
        closed
    }

    /// Run `body` inside the unit and end it with the body's outcome.
    ///
    /// When the body fails and the rollback succeeds, the body's error is returned.
    /// When the rollback itself fails, that failure is returned and the body's error
    /// is logged.
    pub async fn run<T, E, B>(mut self, body: B) -> Result<T, E>
    where
        B: for<'s> FnOnce(&'s mut F::Session) -> BoxFuture<'s, Result<T, E>>,
        T: Send,
        E: From<DbError> + std::fmt::Display + Send + Sync,
    {
        let session = self.begin().await?;
        match body(session).await {
            Ok(value) => {
                self.end(None).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(end_err) = self.end(Some(&err)).await {
                    warn!(error = %err, "Unit of work error superseded by rollback failure");
                    return Err(end_err.into());
                }
                Err(err)
            }
        }
    }
}

impl<F: SessionFactory> Drop for UnitOfWork<F> {
    fn drop(&mut self) {
        if self.state == UnitOfWorkState::Open {
            // Dropping the session rolls back its transaction.
            warn!("Unit of work dropped while open; transaction will be rolled back");
        }
    }
}
