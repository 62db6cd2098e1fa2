//! Connector factory.

use crate::config::Settings;
use crate::db::connector::Connector;
use crate::error::{DbError, DbResult};
use crate::models::BackendType;
use std::sync::Arc;
use tracing::debug;

/// Return the connector for the configured backend.
///
/// ClickHouse is registered in configuration but has no connector yet, so it fails
/// with `NotImplemented` instead of falling back to another backend.
pub fn create_connector(settings: Arc<Settings>) -> DbResult<Connector> {
    let backend = settings.backend();
    debug!(backend = %backend, "Creating connector");

    match backend {
        BackendType::Postgres => Ok(Connector::Postgres(settings)),
        BackendType::MySql => Ok(Connector::MySql(settings)),
        BackendType::Sqlite => Ok(Connector::Sqlite(settings)),
        BackendType::Clickhouse => Err(DbError::not_implemented(backend.display_name())),
    }
}

/// Return the connector for a backend given by name, overriding the configured one.
///
/// Names outside the known backends fail with `UnsupportedBackend`.
pub fn connector_for_name(name: &str, settings: &Settings) -> DbResult<Connector> {
    let backend: BackendType = name
        .parse()
        .map_err(|_| DbError::unsupported_backend(name.trim()))?;
    create_connector(Arc::new(settings.with_backend(backend)))
}
