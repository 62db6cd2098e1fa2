//! Unified database access layer.
//!
//! One environment-driven configuration surface and one connection lifecycle for
//! PostgreSQL, MySQL and SQLite: a lazily built process-wide engine, request-scoped
//! sessions, a transactional unit of work and a liveness probe.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;

pub use config::{Config, Settings};
pub use db::{EngineManager, Session, UnitOfWork};
pub use error::{DbError, DbResult};
