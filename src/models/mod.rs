//! Data models for the database access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;

pub use connection::{BackendType, ConnectionTarget, EngineInfo, PoolArguments};
