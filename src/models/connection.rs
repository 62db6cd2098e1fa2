//! Connection-related data models.
//!
//! This module defines the backend enum and the descriptors connectors hand to the
//! engine: where to connect and how to size the pool.

use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Postgres,
    /// Includes MariaDB
    MySql,
    /// Columnar analytics backend. Registered in configuration, no connector yet.
    Clickhouse,
    Sqlite,
}

impl BackendType {
    pub const ALL: [BackendType; 4] = [
        Self::Postgres,
        Self::MySql,
        Self::Clickhouse,
        Self::Sqlite,
    ];

    /// Name used in configuration (`DB_TYPE`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Clickhouse => "clickhouse",
            Self::Sqlite => "sqlite",
        }
    }

    /// Get the display name for this backend.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::Clickhouse => "ClickHouse",
            Self::Sqlite => "SQLite",
        }
    }

    /// Whether the backend is an embedded, file-backed engine.
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Sqlite)
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        Self::ALL
            .into_iter()
            .find(|backend| backend.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| {
                DbError::configuration(
                    "DB_TYPE",
                    format!(
                        "'{}' is not one of postgres, mysql, clickhouse, sqlite",
                        normalized
                    ),
                )
            })
    }
}

/// Where a pool connects to.
///
/// Network backends carry credentials and an address; embedded backends carry only a
/// file path.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionTarget {
    Network {
        scheme: &'static str,
        host: String,
        port: u16,
        database: String,
        username: String,
        /// Contains sensitive data - never log
        #[serde(skip_serializing)]
        password: String,
    },
    File {
        scheme: &'static str,
        path: String,
    },
}

impl ConnectionTarget {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Network { scheme, .. } | Self::File { scheme, .. } => scheme,
        }
    }

    /// File path for embedded targets.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Network { .. } => None,
        }
    }

    /// Host for network targets.
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Network { host, .. } => Some(host),
            Self::File { .. } => None,
        }
    }

    /// Connection URL with the password masked. Safe to log.
    pub fn redacted_url(&self) -> String {
        match self {
            Self::File { scheme, path } => format!("{}:{}", scheme, path),
            Self::Network {
                scheme,
                host,
                port,
                database,
                username,
                password,
            } => {
                let base = format!("{}://{}:{}", scheme, host, port);
                match url::Url::parse(&base) {
                    Ok(mut url) => {
                        let _ = url.set_username(username);
                        if !password.is_empty() {
                            let _ = url.set_password(Some("****"));
                        }
                        url.set_path(database);
                        url.to_string()
                    }
                    Err(_) => format!("{}://{}@{}:{}/{}", scheme, username, host, port, database),
                }
            }
        }
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted_url())
    }
}

impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionTarget")
            .field(&self.redacted_url())
            .finish()
    }
}

/// Backend-specific pool tuning. Absent fields are left to the pool's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_overflow: Option<u32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secs"
    )]
    pub pool_timeout: Option<Duration>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secs"
    )]
    pub pool_recycle: Option<Duration>,
    pub pre_ping: bool,
}

impl PoolArguments {
    /// Only a liveness check before checkout; everything else defaulted.
    pub fn pre_ping_only() -> Self {
        Self {
            pool_size: None,
            max_overflow: None,
            pool_timeout: None,
            pool_recycle: None,
            pre_ping: true,
        }
    }

    /// Upper bound on simultaneously open connections, if sized.
    pub fn max_connections(&self) -> Option<u32> {
        self.pool_size
            .map(|size| size.saturating_add(self.max_overflow.unwrap_or(0)))
    }

    /// Key/value view of the arguments, omitting absent fields.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

fn serialize_secs<S: serde::Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(duration) => serializer.serialize_u64(duration.as_secs()),
        None => serializer.serialize_none(),
    }
}

/// Description of a live engine, returned to operational tooling.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub backend: BackendType,
    /// Redacted connection URL
    pub target: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> ConnectionTarget {
        ConnectionTarget::Network {
            scheme: "postgres",
            host: "db.internal".to_string(),
            port: 5432,
            database: "orders".to_string(),
            username: "svc".to_string(),
            password: "s3cret".to_string(),
        }
    }

    #[test]
    fn test_backend_type_from_str() {
        assert_eq!("postgres".parse::<BackendType>().unwrap(), BackendType::Postgres);
        assert_eq!("MySQL".parse::<BackendType>().unwrap(), BackendType::MySql);
        assert_eq!(" sqlite ".parse::<BackendType>().unwrap(), BackendType::Sqlite);
        assert_eq!(
            "clickhouse".parse::<BackendType>().unwrap(),
            BackendType::Clickhouse
        );
        let err = "oracle".parse::<BackendType>().unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[test]
    fn test_backend_type_default_and_display() {
        assert_eq!(BackendType::default(), BackendType::Postgres);
        assert_eq!(BackendType::MySql.to_string(), "mysql");
        assert_eq!(BackendType::Sqlite.display_name(), "SQLite");
        assert!(BackendType::Sqlite.is_embedded());
        assert!(!BackendType::Postgres.is_embedded());
    }

    #[test]
    fn test_redacted_url_masks_password() {
        let url = network().redacted_url();
        assert!(!url.contains("s3cret"));
        assert!(url.contains("****"));
        assert!(url.starts_with("postgres://svc:"));
        assert!(url.ends_with("@db.internal:5432/orders"));
    }

    #[test]
    fn test_redacted_url_without_password() {
        let target = ConnectionTarget::Network {
            scheme: "mysql",
            host: "localhost".to_string(),
            port: 3306,
            database: "app".to_string(),
            username: "app".to_string(),
            password: String::new(),
        };
        assert_eq!(target.redacted_url(), "mysql://app@localhost:3306/app");
    }

    #[test]
    fn test_debug_and_display_never_leak_password() {
        let target = network();
        assert!(!format!("{:?}", target).contains("s3cret"));
        assert!(!format!("{}", target).contains("s3cret"));
        let json = serde_json::to_string(&target).unwrap();
        assert!(!json.contains("s3cret"));
    }

    #[test]
    fn test_file_target() {
        let target = ConnectionTarget::File {
            scheme: "sqlite",
            path: "data/app.db".to_string(),
        };
        assert_eq!(target.path(), Some("data/app.db"));
        assert_eq!(target.host(), None);
        assert_eq!(target.redacted_url(), "sqlite:data/app.db");
    }

    #[test]
    fn test_pool_arguments_map_omits_absent_fields() {
        let map = PoolArguments::pre_ping_only().to_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map["pre_ping"], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_pool_arguments_max_connections() {
        let args = PoolArguments {
            pool_size: Some(10),
            max_overflow: Some(20),
            pool_timeout: Some(Duration::from_secs(30)),
            pool_recycle: Some(Duration::from_secs(1800)),
            pre_ping: true,
        };
        assert_eq!(args.max_connections(), Some(30));
        let map = args.to_map();
        assert_eq!(map["pool_timeout"], 30);
        assert_eq!(map["pool_recycle"], 1800);
        assert_eq!(PoolArguments::pre_ping_only().max_connections(), None);
    }
}
