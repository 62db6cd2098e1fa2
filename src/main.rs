//! db-access - operational entry point for the database access layer.
//!
//! Probes the configured database, prints the resolved connection target, or serves
//! the HTTP adapter.

use db_access::config::{self, Command, Config};
use db_access::db::{self, Connector, connector_for_name, create_connector};
use db_access::http::{self, AppState, HttpOptions};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn describe_target(connector: &Connector) -> db_access::DbResult<serde_json::Value> {
    let target = connector.build_target()?;
    Ok(json!({
        "backend": connector.backend(),
        "target": target.redacted_url(),
        "pool_arguments": connector.pool_arguments().to_map(),
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    info!("Starting db-access v{}", env!("CARGO_PKG_VERSION"));

    match config.command {
        Command::Health => {
            let healthy = db::check_health().await;
            db::dispose_engine().await;
            println!("{}", if healthy { "healthy" } else { "unhealthy" });
            if !healthy {
                std::process::exit(1);
            }
        }
        Command::Target { backend } => {
            let settings = config::settings()?;
            let connector = match backend {
                Some(name) => connector_for_name(&name, settings)?,
                None => create_connector(Arc::new(settings.clone()))?,
            };
            let description = describe_target(&connector)?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Command::Serve {
            host,
            port,
            expose_error_types,
        } => {
            let state = AppState::new(
                db::engine_manager(),
                HttpOptions { expose_error_types },
            );
            if let Err(e) = http::serve(state, &host, port).await {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
            info!("Server shutdown complete");
        }
    }

    Ok(())
}
