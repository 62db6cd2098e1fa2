//! Process-wide engine lifecycle.
//!
//! [`EngineManager`] owns at most one live [`Engine`] and the [`SessionMaker`] bound to
//! it. Both are created lazily on first use and torn down by [`EngineManager::dispose`],
//! after which the next caller builds a fresh pool.
//!
//! # Concurrency
//!
//! - The current generation (engine cell + session factory cell) sits behind a tokio
//!   `RwLock`. Callers take the read lock and initialise through `OnceCell`, so
//!   concurrent first callers share a single pool construction.
//! - A failed construction leaves the cell empty; the next caller retries.
//! - `dispose` takes the write lock only to detach the current generation, so it waits
//!   for in-flight initialisation. The old pool is drained after the lock is released:
//!   a task that still holds a session from it can keep calling into the manager, and
//!   the next caller may build a fresh pool while the old one drains.

use crate::config::{self, Settings};
use crate::db::factory::create_connector;
use crate::db::health;
use crate::db::pool::Engine;
use crate::db::session::{Session, SessionMaker};
use crate::error::{DbError, DbResult};
use crate::models::EngineInfo;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

/// Where the manager reads its settings from.
#[derive(Debug, Clone)]
enum SettingsSource {
    /// Process-wide settings resolved from the environment.
    Environment,
    Fixed(Arc<Settings>),
}

impl SettingsSource {
    fn resolve(&self) -> DbResult<Arc<Settings>> {
        match self {
            Self::Environment => config::settings().map(|s| Arc::new(s.clone())),
            Self::Fixed(settings) => Ok(Arc::clone(settings)),
        }
    }
}

#[derive(Default)]
struct Generation {
    engine: OnceCell<Arc<Engine>>,
    sessions: OnceCell<SessionMaker>,
}

pub struct EngineManager {
    source: SettingsSource,
    current: RwLock<Generation>,
    /// Count of pools constructed over the manager's lifetime.
    builds: AtomicUsize,
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineManager")
            .field("source", &self.source)
            .field("builds", &self.builds())
            .finish_non_exhaustive()
    }
}

impl EngineManager {
    /// Manager that resolves settings from the environment on first use.
    pub fn from_env() -> Self {
        Self::new(SettingsSource::Environment)
    }

    /// Manager bound to explicit settings.
    pub fn with_settings(settings: Settings) -> Self {
        Self::new(SettingsSource::Fixed(Arc::new(settings)))
    }

    fn new(source: SettingsSource) -> Self {
        Self {
            source,
            current: RwLock::new(Generation::default()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Return the live engine, building it on first use.
    pub async fn get_engine(&self) -> DbResult<Arc<Engine>> {
        let generation = self.current.read().await;
        let engine = generation
            .engine
            .get_or_try_init(|| self.build_engine())
            .await?;
        Ok(Arc::clone(engine))
    }

    /// Return the session factory bound to the live engine.
    pub async fn get_session_factory(&self) -> DbResult<SessionMaker> {
        let generation = self.current.read().await;
        let sessions = generation
            .sessions
            .get_or_try_init(|| async {
                let engine = generation
                    .engine
                    .get_or_try_init(|| self.build_engine())
                    .await?;
                Ok::<_, DbError>(SessionMaker::new(Arc::clone(engine)))
            })
            .await?;
        Ok(sessions.clone())
    }

    /// Open a plain session on the live engine.
    pub async fn acquire_session(&self) -> DbResult<Session> {
        self.get_session_factory().await?.open().await
    }

    /// Liveness probe. Never fails; any error reads as unhealthy.
    pub async fn check_health(&self) -> bool {
        health::probe(self).await
    }

    /// Forget the engine and session factory, then close the old pool.
    ///
    /// New checkouts from the old pool fail immediately. The call returns once every
    /// connection checked out of it has come back; the manager is usable again as
    /// soon as the old generation is detached. No-op when nothing is live.
    pub async fn dispose(&self) {
        let previous = {
            let mut generation = self.current.write().await;
            std::mem::take(&mut *generation)
        };

        match previous.engine.into_inner() {
            Some(engine) => {
                engine.close().await;
                info!(backend = %engine.backend(), "Engine disposed");
            }
            None => debug!("Dispose requested with no live engine"),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.current.read().await.engine.initialized()
    }

    /// Describe the live engine without initialising one.
    pub async fn info(&self) -> Option<EngineInfo> {
        self.current.read().await.engine.get().map(|e| e.info())
    }

    /// Number of pools this manager has constructed.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Acquire)
    }

    async fn build_engine(&self) -> DbResult<Arc<Engine>> {
        let settings = self.source.resolve()?;
        let connector = create_connector(settings)?;
        let engine = Engine::connect(&connector).await?;
        let builds = self.builds.fetch_add(1, Ordering::AcqRel) + 1;

        info!(
            backend = %engine.backend(),
            target = %engine.target(),
            builds,
            "Engine initialized"
        );
        Ok(Arc::new(engine))
    }
}

static ENGINE_MANAGER: LazyLock<Arc<EngineManager>> =
    LazyLock::new(|| Arc::new(EngineManager::from_env()));

/// The process-wide engine manager.
pub fn engine_manager() -> Arc<EngineManager> {
    Arc::clone(&ENGINE_MANAGER)
}

/// Return the process-wide engine, building it on first use.
pub async fn get_engine() -> DbResult<Arc<Engine>> {
    ENGINE_MANAGER.get_engine().await
}

/// Return the process-wide session factory.
pub async fn get_session_factory() -> DbResult<SessionMaker> {
    ENGINE_MANAGER.get_session_factory().await
}

/// Open a request-scoped session on the process-wide engine.
pub async fn acquire_session() -> DbResult<Session> {
    ENGINE_MANAGER.acquire_session().await
}

/// Tear down the process-wide engine. Call once at shutdown.
pub async fn dispose_engine() {
    ENGINE_MANAGER.dispose().await
}

/// Liveness probe against the process-wide engine.
pub async fn check_health() -> bool {
    ENGINE_MANAGER.check_health().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendType;

    #[tokio::test]
    async fn test_dispose_when_uninitialized_is_noop() {
        let manager = EngineManager::with_settings(Settings::default());
        manager.dispose().await;
        manager.dispose().await;
        assert!(!manager.is_initialized().await);
        assert_eq!(manager.builds(), 0);
        assert!(manager.info().await.is_none());
    }

    #[tokio::test]
    async fn test_not_implemented_backend_propagates() {
        let settings = Settings::default().with_backend(BackendType::Clickhouse);
        let manager = EngineManager::with_settings(settings);
        let err = manager.get_engine().await.unwrap_err();
        assert!(matches!(err, DbError::NotImplemented { .. }));
        assert!(!manager.is_initialized().await);

        let err = manager.get_session_factory().await.unwrap_err();
        assert!(matches!(err, DbError::NotImplemented { .. }));
        assert_eq!(manager.builds(), 0);
    }

    #[tokio::test]
    async fn test_session_factory_shares_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.db");
        let settings = Settings::from_vars([
            ("DB_TYPE", "sqlite"),
            ("DB_NAME", path.to_str().unwrap()),
        ])
        .unwrap();
        let manager = EngineManager::with_settings(settings);

        let factory = manager.get_session_factory().await.unwrap();
        let engine = manager.get_engine().await.unwrap();
        assert!(Arc::ptr_eq(factory.engine(), &engine));
        assert_eq!(manager.builds(), 1);

        let info = manager.info().await.unwrap();
        assert_eq!(info.backend, BackendType::Sqlite);

        manager.dispose().await;
        assert!(engine.is_closed());
    }
}
