//! Database liveness probe.

use crate::db::engine::EngineManager;
use tracing::warn;

/// Resolve the engine and run a trivial query through it.
///
/// Returns `false` instead of an error for any failure: configuration, pool
/// construction, checkout or the query itself.
pub async fn probe(manager: &EngineManager) -> bool {
    let engine = match manager.get_engine().await {
        Ok(engine) => engine,
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "Health check could not obtain an engine");
            return false;
        }
    };

    match engine.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                error = %e,
                backend = %engine.backend(),
                "Health check query failed"
            );
            false
        }
    }
}
