//! Configuration handling.
//!
//! Library settings are resolved once from environment-like key/value input with the
//! `DB_` prefix (keys are case-insensitive). The `db-access` binary additionally takes
//! CLI arguments and `DB_ACCESS_*` environment variables via clap.

use crate::error::{DbError, DbResult};
use crate::models::BackendType;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Prefix shared by all settings keys.
pub const ENV_PREFIX: &str = "DB_";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_NAME: &str = "app";
pub const DEFAULT_USER: &str = "app";

// Pool configuration defaults
pub const DEFAULT_POOL_SIZE: u32 = 10;
pub const DEFAULT_MAX_OVERFLOW: u32 = 20;
pub const DEFAULT_POOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POOL_RECYCLE_SECS: u64 = 1800;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Database settings. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    backend: BackendType,
    host: String,
    port: u16,
    name: String,
    user: String,
    password: String,
    pool_size: u32,
    max_overflow: u32,
    pool_timeout_seconds: u64,
    pool_recycle_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            name: DEFAULT_NAME.to_string(),
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            pool_size: DEFAULT_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            pool_timeout_seconds: DEFAULT_POOL_TIMEOUT_SECS,
            pool_recycle_seconds: DEFAULT_POOL_RECYCLE_SECS,
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> DbResult<Self> {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Build settings from raw OS key/value pairs.
    ///
    /// Keys that are not valid UTF-8 can never name a setting and are skipped. A
    /// `DB_` key whose value is not valid UTF-8 is a configuration error for that key.
    pub fn from_os_vars<I>(vars: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut pairs = Vec::new();
        for (key, value) in vars {
            let Ok(key) = key.into_string() else {
                continue;
            };
            match value.into_string() {
                Ok(value) => pairs.push((key, value)),
                Err(_) => {
                    let upper = key.to_ascii_uppercase();
                    if upper.starts_with(ENV_PREFIX) {
                        return Err(DbError::configuration(upper, "value is not valid UTF-8"));
                    }
                }
            }
        }
        Self::from_vars(pairs)
    }

    /// Build settings from key/value pairs.
    ///
    /// Keys carry the `DB_` prefix and are matched case-insensitively. Keys without
    /// the prefix or with an unknown suffix are ignored; missing keys take defaults.
    /// When a key appears more than once the last value wins.
    pub fn from_vars<I, K, V>(vars: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();

        for (key, value) in vars {
            let key = key.as_ref().to_ascii_uppercase();
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();

            match field {
                "TYPE" => settings.backend = value.parse()?,
                "HOST" => settings.host = value.to_string(),
                "PORT" => settings.port = parse_number(&key, value)?,
                "NAME" => settings.name = value.to_string(),
                "USER" => settings.user = value.to_string(),
                "PASSWORD" => settings.password = value.to_string(),
                "POOL_SIZE" => settings.pool_size = parse_number(&key, value)?,
                "MAX_OVERFLOW" => settings.max_overflow = parse_number(&key, value)?,
                "POOL_TIMEOUT_SECONDS" => {
                    settings.pool_timeout_seconds = parse_number(&key, value)?
                }
                "POOL_RECYCLE_SECONDS" => {
                    settings.pool_recycle_seconds = parse_number(&key, value)?
                }
                _ => {}
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> DbResult<()> {
        if self.pool_size == 0 {
            return Err(DbError::configuration(
                "DB_POOL_SIZE",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Copy of these settings targeting a different backend.
    pub fn with_backend(&self, backend: BackendType) -> Self {
        Self {
            backend,
            ..self.clone()
        }
    }

    pub fn backend(&self) -> BackendType {
        self.backend
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Database name, or the database file path for embedded backends.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn max_overflow(&self) -> u32 {
        self.max_overflow
    }

    pub fn pool_timeout_seconds(&self) -> u64 {
        self.pool_timeout_seconds
    }

    pub fn pool_recycle_seconds(&self) -> u64 {
        self.pool_recycle_seconds
    }

    /// Get the pool checkout timeout as a Duration.
    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_seconds)
    }

    /// Get the connection max lifetime as a Duration.
    pub fn pool_recycle(&self) -> Duration {
        Duration::from_secs(self.pool_recycle_seconds)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"****")
            .field("pool_size", &self.pool_size)
            .field("max_overflow", &self.max_overflow)
            .field("pool_timeout_seconds", &self.pool_timeout_seconds)
            .field("pool_recycle_seconds", &self.pool_recycle_seconds)
            .finish()
    }
}

fn parse_number<T>(key: &str, value: &str) -> DbResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DbError::configuration(key, format!("invalid value '{}': {}", value, e)))
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Process-wide settings, resolved from the environment on first use.
///
/// A resolution failure is returned to the caller and not cached.
pub fn settings() -> DbResult<&'static Settings> {
    if let Some(settings) = SETTINGS.get() {
        return Ok(settings);
    }
    let resolved = Settings::from_env()?;
    Ok(SETTINGS.get_or_init(|| resolved))
}

/// Operational command run by the binary.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Probe the configured database and exit non-zero when it is unreachable
    Health,
    /// Print the redacted connection target and pool arguments as JSON
    Target {
        /// Backend name overriding DB_TYPE
        #[arg(long)]
        backend: Option<String>,
    },
    /// Serve the HTTP health endpoint until SIGINT/SIGTERM
    Serve {
        /// HTTP host to bind to
        #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "DB_ACCESS_HTTP_HOST")]
        host: String,

        /// HTTP port to bind to
        #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "DB_ACCESS_HTTP_PORT")]
        port: u16,

        /// Include the error kind in 5xx response bodies
        #[arg(long, env = "DB_ACCESS_EXPOSE_ERROR_TYPES")]
        expose_error_types: bool,
    },
}

/// Configuration for the db-access binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-access",
    about = "Unified database access layer - connection lifecycle tooling",
    version,
    author
)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_ACCESS_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_ACCESS_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
