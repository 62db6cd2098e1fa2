//! Backend connectors.
//!
//! A [`Connector`] turns [`Settings`] into the two things the engine needs: a
//! [`ConnectionTarget`] and the [`PoolArguments`] for that backend. Connectors are
//! pure; nothing here touches the network or the filesystem.

use crate::config::Settings;
use crate::error::{DbError, DbResult};
use crate::models::{BackendType, ConnectionTarget, PoolArguments};
use std::sync::Arc;

/// Connector for one backend, owning the settings it was built from.
#[derive(Debug, Clone)]
pub enum Connector {
    /// Any PostgreSQL-wire compatible server.
    Postgres(Arc<Settings>),
    /// MySQL and MariaDB.
    MySql(Arc<Settings>),
    /// Embedded database; `DB_NAME` is the file path.
    Sqlite(Arc<Settings>),
    /// Columnar analytics placeholder. Every target request fails.
    Columnar(Arc<Settings>),
}

impl Connector {
    pub fn settings(&self) -> &Arc<Settings> {
        match self {
            Self::Postgres(s) | Self::MySql(s) | Self::Sqlite(s) | Self::Columnar(s) => s,
        }
    }

    pub fn backend(&self) -> BackendType {
        match self {
            Self::Postgres(_) => BackendType::Postgres,
            Self::MySql(_) => BackendType::MySql,
            Self::Sqlite(_) => BackendType::Sqlite,
            Self::Columnar(_) => BackendType::Clickhouse,
        }
    }

    /// Build the connection target for this backend.
    pub fn build_target(&self) -> DbResult<ConnectionTarget> {
        match self {
            Self::Postgres(settings) => Ok(network_target("postgres", settings)),
            Self::MySql(settings) => Ok(network_target("mysql", settings)),
            Self::Sqlite(settings) => Ok(ConnectionTarget::File {
                scheme: "sqlite",
                path: settings.name().to_string(),
            }),
            Self::Columnar(_) => Err(DbError::not_implemented(
                BackendType::Clickhouse.display_name(),
            )),
        }
    }

    /// Pool tuning for this backend.
    ///
    /// File-backed engines only get a pre-checkout ping; overflow and checkout
    /// timeouts do not apply to them.
    pub fn pool_arguments(&self) -> PoolArguments {
        match self {
            Self::Sqlite(_) => PoolArguments::pre_ping_only(),
            _ => default_pool_arguments(self.settings()),
        }
    }
}

fn network_target(scheme: &'static str, settings: &Settings) -> ConnectionTarget {
    ConnectionTarget::Network {
        scheme,
        host: settings.host().to_string(),
        port: settings.port(),
        database: settings.name().to_string(),
        username: settings.user().to_string(),
        password: settings.password().to_string(),
    }
}

fn default_pool_arguments(settings: &Settings) -> PoolArguments {
    PoolArguments {
        pool_size: Some(settings.pool_size()),
        max_overflow: Some(settings.max_overflow()),
        pool_timeout: Some(settings.pool_timeout()),
        pool_recycle: Some(settings.pool_recycle()),
        pre_ping: true,
    }
}
