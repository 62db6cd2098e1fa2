//! Engine lifecycle tests against temporary SQLite databases.

use db_access::config::Settings;
use db_access::db::{EngineManager, TransactionalSession};
use db_access::error::DbError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn sqlite_manager(path: &Path) -> EngineManager {
    let settings = Settings::from_vars([
        ("DB_TYPE", "sqlite"),
        ("DB_NAME", path.to_str().unwrap()),
    ])
    .unwrap();
    EngineManager::with_settings(settings)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_builds_one_pool() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(sqlite_manager(&dir.path().join("concurrent.db")));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_engine().await })
        })
        .collect();

    let mut engines = Vec::new();
    for handle in handles {
        engines.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(manager.builds(), 1);
    assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
    manager.dispose().await;
}

#[tokio::test]
async fn test_dispose_then_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir.path().join("rebuild.db"));

    let first = manager.get_engine().await.unwrap();
    assert!(manager.is_initialized().await);
    manager.dispose().await;
    assert!(first.is_closed());
    assert!(!manager.is_initialized().await);

    let second = manager.get_engine().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_closed());
    assert_eq!(manager.builds(), 2);
    manager.dispose().await;
}

#[tokio::test]
async fn test_failed_construction_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("missing");
    let manager = sqlite_manager(&nested.join("retry.db"));

    let err = manager.get_engine().await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(err.is_retryable());
    assert!(!manager.is_initialized().await);

    std::fs::create_dir(&nested).unwrap();
    manager.get_engine().await.unwrap();
    assert_eq!(manager.builds(), 1);
    manager.dispose().await;
}

#[tokio::test]
async fn test_unreachable_server_is_unhealthy() {
    let settings = Settings::from_vars([
        ("DB_TYPE", "postgres"),
        ("DB_HOST", "127.0.0.1"),
        ("DB_PORT", "1"),
        ("DB_POOL_TIMEOUT_SECONDS", "1"),
    ])
    .unwrap();
    let manager = EngineManager::with_settings(settings);

    assert!(!manager.check_health().await);
    assert!(!manager.is_initialized().await);
}

#[tokio::test]
async fn test_dropped_session_returns_connection() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir.path().join("release.db"));

    // The SQLite pool holds one connection, so each open below needs the previous
    // session to have been released.
    for _ in 0..3 {
        let mut session = manager.acquire_session().await.unwrap();
        session.execute("SELECT 1").await.unwrap();
    }

    let session = manager.acquire_session().await.unwrap();
    session.close().await.unwrap();
    assert!(manager.check_health().await);
    manager.dispose().await;
}

#[tokio::test]
async fn test_closing_transactional_session_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir.path().join("rollback.db"));

    let mut setup = manager.acquire_session().await.unwrap();
    setup
        .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();
    setup.close().await.unwrap();

    let factory = manager.get_session_factory().await.unwrap();
    let mut session = factory.open_transactional().await.unwrap();
    assert!(session.in_transaction());
    session
        .execute("INSERT INTO items (name) VALUES ('pending')")
        .await
        .unwrap();
    TransactionalSession::close(session).await.unwrap();

    let mut check = manager.acquire_session().await.unwrap();
    let count: i64 = check
        .fetch_scalar("SELECT COUNT(*) FROM items")
        .await
        .unwrap();
    assert_eq!(count, 0);
    drop(check);
    manager.dispose().await;
}

#[tokio::test]
async fn test_commit_outside_transaction_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let manager = sqlite_manager(&dir.path().join("state.db"));

    let mut session = manager.acquire_session().await.unwrap();
    let err = session.commit().await.unwrap_err();
    assert!(matches!(err, DbError::InvalidState { .. }));

    // The connection is still usable after the rejected commit.
    session.execute("SELECT 1").await.unwrap();
    drop(session);
    manager.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_holder_can_use_manager_during_dispose() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(sqlite_manager(&dir.path().join("holder.db")));

    let session = manager.acquire_session().await.unwrap();
    let old = manager.get_engine().await.unwrap();

    let disposer = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.dispose().await })
    };

    // Wait for dispose to detach the old generation.
    timeout(Duration::from_secs(5), async {
        while manager.is_initialized().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Dispose is still draining the old pool behind our session, yet the manager
    // keeps answering.
    let fresh = timeout(Duration::from_secs(5), manager.get_engine())
        .await
        .unwrap()
        .unwrap();
    assert!(!Arc::ptr_eq(&fresh, &old));
    drop(fresh);

    drop(session);
    timeout(Duration::from_secs(5), disposer)
        .await
        .unwrap()
        .unwrap();
    assert!(old.is_closed());
    assert_eq!(manager.builds(), 2);
    manager.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispose_racing_initialisation() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(sqlite_manager(&dir.path().join("race.db")));

    let mut handles = Vec::new();
    for i in 0..24 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            match i % 3 {
                0 => manager.dispose().await,
                1 => {
                    manager.get_engine().await.unwrap();
                }
                _ => {
                    manager.get_session_factory().await.unwrap();
                }
            }
        }));
    }

    timeout(Duration::from_secs(30), async {
        for handle in handles {
            handle.await.unwrap();
        }
    })
    .await
    .unwrap();

    // Whatever generation survived the race is usable and consistent.
    let factory = manager.get_session_factory().await.unwrap();
    let engine = manager.get_engine().await.unwrap();
    assert!(Arc::ptr_eq(factory.engine(), &engine));
    assert!(!engine.is_closed());
    drop(factory);

    manager.dispose().await;
    assert!(engine.is_closed());
    assert!(!manager.is_initialized().await);
}
