//! Database access layer.
//!
//! - Connector variants and the factory that selects one from settings
//! - Engine (connection pool) construction
//! - Process-wide engine manager with lazy initialisation and disposal
//! - Request-scoped sessions and the transactional unit of work
//! - Health probe

pub mod connector;
pub mod engine;
pub mod factory;
pub mod health;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod session;
pub mod unit_of_work;

pub use connector::Connector;
pub use engine::{
    EngineManager, acquire_session, check_health, dispose_engine, engine_manager, get_engine,
    get_session_factory,
};
pub use factory::{connector_for_name, create_connector};
pub use pool::{DbConnection, DbPool, DbTransaction, Engine};
pub use session::{Session, SessionFactory, SessionMaker, TransactionalSession};
pub use unit_of_work::{UnitOfWork, UnitOfWorkState};
