//! Connection pools and the engine that owns them.
//!
//! Database-specific pools (MySqlPool, PgPool, SqlitePool) are used instead of
//! `AnyPool` so that each backend keeps its full type support.

use crate::db::connector::Connector;
use crate::error::{DbError, DbResult};
use crate::models::{BackendType, ConnectionTarget, EngineInfo, PoolArguments};
use chrono::{DateTime, Utc};
use sqlx::pool::{PoolConnection, PoolOptions};
use sqlx::{
    MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool, Transaction, mysql::MySqlConnectOptions,
    postgres::PgConnectOptions, sqlite::SqliteConnectOptions,
};
use std::time::Duration;
use tracing::{debug, info};

/// SQLite serializes writers; a single connection avoids SQLITE_BUSY between sessions.
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;

/// Checkout timeout when the connector does not set one.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool, self, pool => pool.close().await)
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(DbPool, self, pool => pool.is_closed())
    }

    /// Number of open connections, idle or in use.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(DbPool, self, pool => pool.size())
    }

    pub fn backend(&self) -> BackendType {
        match self {
            DbPool::MySql(_) => BackendType::MySql,
            DbPool::Postgres(_) => BackendType::Postgres,
            DbPool::SQLite(_) => BackendType::Sqlite,
        }
    }
}

/// A connection checked out of a [`DbPool`]. Returned to the pool on drop.
#[derive(Debug)]
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

/// A pooled connection inside an open transaction.
///
/// Dropping it without commit rolls the transaction back.
#[derive(Debug)]
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction, self, tx => tx.commit().await.map_err(DbError::from))
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction, self, tx => tx.rollback().await.map_err(DbError::from))
    }
}

/// Live connection pool built from a connector.
#[derive(Debug)]
pub struct Engine {
    pool: DbPool,
    target: ConnectionTarget,
    acquire_timeout: Duration,
    created_at: DateTime<Utc>,
}

impl Engine {
    /// Build the pool for a connector.
    ///
    /// The first connection is opened eagerly, so unreachable hosts and bad
    /// credentials fail here rather than on first use.
    pub async fn connect(connector: &Connector) -> DbResult<Self> {
        let backend = connector.backend();
        let target = connector.build_target()?;
        let args = connector.pool_arguments();

        info!(
            backend = %backend,
            target = %target,
            max_connections = ?args.max_connections(),
            "Creating connection pool"
        );

        let pool = match (backend, &target) {
            (
                BackendType::Postgres,
                ConnectionTarget::Network {
                    host,
                    port,
                    database,
                    username,
                    password,
                    ..
                },
            ) => {
                let mut options = PgConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .username(username)
                    .database(database);
                if !password.is_empty() {
                    options = options.password(password);
                }
                let pool = pool_options::<Postgres>(&args, backend)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(backend, e))?;
                DbPool::Postgres(pool)
            }
            (
                BackendType::MySql,
                ConnectionTarget::Network {
                    host,
                    port,
                    database,
                    username,
                    password,
                    ..
                },
            ) => {
                let mut options = MySqlConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .username(username)
                    .database(database)
                    .charset("utf8mb4");
                if !password.is_empty() {
                    options = options.password(password);
                }
                let pool = pool_options::<MySql>(&args, backend)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(backend, e))?;
                DbPool::MySql(pool)
            }
            (BackendType::Sqlite, ConnectionTarget::File { path, .. }) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                let pool = pool_options::<Sqlite>(&args, backend)
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(backend, e))?;
                DbPool::SQLite(pool)
            }
            (backend, target) => {
                return Err(DbError::internal(format!(
                    "Connector for {} produced an incompatible target: {}",
                    backend, target
                )));
            }
        };

        Ok(Self {
            pool,
            target,
            acquire_timeout: args.pool_timeout.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT),
            created_at: Utc::now(),
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn backend(&self) -> BackendType {
        self.pool.backend()
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            backend: self.backend(),
            target: self.target.redacted_url(),
            created_at: self.created_at,
        }
    }

    /// Check a plain connection out of the pool.
    pub async fn acquire(&self) -> DbResult<DbConnection> {
        let conn = match &self.pool {
            DbPool::MySql(pool) => pool.acquire().await.map(DbConnection::MySql),
            DbPool::Postgres(pool) => pool.acquire().await.map(DbConnection::Postgres),
            DbPool::SQLite(pool) => pool.acquire().await.map(DbConnection::SQLite),
        };
        conn.map_err(|e| self.checkout_error(e))
    }

    /// Check a connection out of the pool and begin a transaction on it.
    pub async fn begin(&self) -> DbResult<DbTransaction> {
        let tx = match &self.pool {
            DbPool::MySql(pool) => pool.begin().await.map(DbTransaction::MySql),
            DbPool::Postgres(pool) => pool.begin().await.map(DbTransaction::Postgres),
            DbPool::SQLite(pool) => pool.begin().await.map(DbTransaction::SQLite),
        };
        tx.map_err(|e| self.checkout_error(e))
    }

    /// Trivial round trip through the pool.
    pub async fn ping(&self) -> DbResult<()> {
        impl_db_dispatch!(DbPool, &self.pool, pool => {
            sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map_err(|e| self.checkout_error(e))?;
        });
        debug!(backend = %self.backend(), "Ping succeeded");
        Ok(())
    }

    /// Close the pool gracefully. Connections still checked out are closed when
    /// they are returned.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(backend = %self.backend(), target = %self.target, "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn checkout_error(&self, error: sqlx::Error) -> DbError {
        match error {
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "connection pool acquire",
                Some(self.acquire_timeout.as_secs()),
            ),
            other => other.into(),
        }
    }
}

/// Translate pool arguments into sqlx pool options.
///
/// sqlx has no overflow tier, so `pool_size + max_overflow` becomes the connection
/// ceiling; the recycle interval becomes the connection max lifetime.
fn pool_options<DB: sqlx::Database>(args: &PoolArguments, backend: BackendType) -> PoolOptions<DB> {
    let max_connections = args.max_connections().unwrap_or(if backend.is_embedded() {
        DEFAULT_MAX_CONNECTIONS_SQLITE
    } else {
        crate::config::DEFAULT_POOL_SIZE
    });

    let mut options = PoolOptions::<DB>::new()
        .max_connections(max_connections)
        .acquire_timeout(args.pool_timeout.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT))
        .test_before_acquire(args.pre_ping);
    if let Some(recycle) = args.pool_recycle {
        options = options.max_lifetime(recycle);
    }
    options
}

fn connect_error(backend: BackendType, error: sqlx::Error) -> DbError {
    DbError::connection(
        format!("Failed to connect: {}", error),
        connection_suggestion(backend, &error),
    )
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(backend: BackendType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            backend.display_name()
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify DB_USER and DB_PASSWORD".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database named by DB_NAME exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match backend {
        BackendType::Sqlite => {
            "Verify DB_NAME is a writable file path whose directory exists".to_string()
        }
        _ => "Verify DB_HOST, DB_PORT and network reachability".to_string(),
    }
}
