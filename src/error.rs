//! Error types for the database access layer.
//!
//! All failures surface as [`DbError`]. Startup failures (configuration, unsupported or
//! unbuilt backends) are fatal; connectivity failures are retryable and never cached.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {key}: {message}")]
    Configuration { key: String, message: String },

    #[error("Unsupported database backend: {backend}")]
    UnsupportedBackend { backend: String },

    #[error("{backend} connector not yet implemented")]
    NotImplemented { backend: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} {}", describe_limit(.limit_secs))]
    Timeout {
        operation: String,
        /// Configured limit, when the failing call site knows it
        limit_secs: Option<u64>,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Transaction error: {message} (session: {session_id})")]
    Transaction { message: String, session_id: String },

    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error for the given settings key.
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported backend error.
    pub fn unsupported_backend(backend: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            backend: backend.into(),
        }
    }

    /// Create a not-implemented error for a registered but unbuilt backend.
    pub fn not_implemented(backend: impl Into<String>) -> Self {
        Self::NotImplemented {
            backend: backend.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error, optionally naming the limit that was exceeded.
    pub fn timeout(operation: impl Into<String>, limit_secs: Option<u64>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit_secs,
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            session_id: session_id.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Check if this error means the backend could not be reached.
    pub fn is_connectivity(&self) -> bool {
        self.is_retryable()
    }

    /// Stable short name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "ConfigurationError",
            Self::UnsupportedBackend { .. } => "UnsupportedBackendError",
            Self::NotImplemented { .. } => "NotImplementedError",
            Self::Connection { .. } => "ConnectivityError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Database { .. } => "DatabaseError",
            Self::Transaction { .. } => "TransactionError",
            Self::InvalidState { .. } => "InvalidStateError",
            Self::Internal { .. } => "InternalError",
        }
    }
}

fn describe_limit(limit_secs: &Option<u64>) -> String {
    match limit_secs {
        Some(secs) => format!("exceeded {}s", secs),
        None => "timed out".to_string(),
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the DB_* settings for the configured backend",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", None),
            sqlx::Error::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "The engine was disposed; request a new engine",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_configuration_error_names_key() {
        let err = DbError::configuration("DB_PORT", "expected an integer");
        assert!(err.to_string().contains("DB_PORT"));
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::internal("boom").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("acquire", Some(30)).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::not_implemented("clickhouse").is_retryable());
        assert!(!DbError::unsupported_backend("oracle").is_retryable());
        assert!(!DbError::configuration("DB_TYPE", "bad").is_retryable());
    }

    #[test]
    fn test_stub_and_unsupported_are_distinct() {
        let stub = DbError::not_implemented("clickhouse");
        let unknown = DbError::unsupported_backend("oracle");
        assert_ne!(stub.kind(), unknown.kind());
        assert!(stub.to_string().contains("not yet implemented"));
        assert!(unknown.to_string().contains("oracle"));
    }

    #[test]
    fn test_pool_closed_maps_to_connection() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Connection { .. }));
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_pool_timeout_maps_to_timeout() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::Timeout { limit_secs: None, .. }));
        assert_eq!(err.to_string(), "Timeout: connection pool acquire timed out");
    }

    #[test]
    fn test_timeout_with_limit_names_it() {
        let err = DbError::timeout("connection pool acquire", Some(5));
        assert_eq!(err.to_string(), "Timeout: connection pool acquire exceeded 5s");
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::Database { .. }));
        assert!(!err.is_retryable());
    }
}
