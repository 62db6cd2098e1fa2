//! Backend dispatch macro.
//!
//! The pool, connection and transaction wrappers are all tagged over the three sqlx
//! drivers. This macro expands one body into a match arm per driver so the body is
//! type-checked against each concrete driver type.

/// Dispatch over a `DbPool`, `DbConnection` or `DbTransaction` value.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, self, pool => pool.close().await);
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, $inner:ident => $body:expr) => {
        match $value {
            $crate::db::pool::$kind::MySql($inner) => $body,
            $crate::db::pool::$kind::Postgres($inner) => $body,
            $crate::db::pool::$kind::SQLite($inner) => $body,
        }
    };
}

pub use impl_db_dispatch;
