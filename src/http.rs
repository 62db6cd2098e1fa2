//! HTTP boundary adapter.
//!
//! Maps [`DbError`] onto JSON error responses, hands each request its own
//! [`Session`], and serves a health endpoint backed by the engine manager.

use crate::db::engine::EngineManager;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use axum::extract::{FromRef, FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpOptions {
    /// Include the error kind in 5xx bodies.
    pub expose_error_types: bool,
}

/// Shared state for the router.
#[derive(Debug, Clone)]
pub struct AppState {
    pub manager: Arc<EngineManager>,
    pub options: HttpOptions,
}

impl AppState {
    pub fn new(manager: Arc<EngineManager>, options: HttpOptions) -> Self {
        Self { manager, options }
    }

    /// Wrap an error for rendering with this state's options.
    pub fn reject(&self, error: DbError) -> ApiError {
        ApiError {
            error,
            expose_error_type: self.options.expose_error_types,
        }
    }
}

/// JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<&'static str>,
}

/// A [`DbError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError {
    error: DbError,
    expose_error_type: bool,
}

impl ApiError {
    pub fn error(&self) -> &DbError {
        &self.error
    }

    pub fn status(&self) -> StatusCode {
        if self.error.is_connectivity() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    pub fn body(&self) -> ErrorBody {
        let message = if self.error.is_connectivity() {
            "Service unavailable"
        } else {
            "Internal server error"
        };
        ErrorBody {
            message: message.to_string(),
            data: None,
            error_type: self.expose_error_type.then(|| self.error.kind()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(error: DbError) -> Self {
        Self {
            error,
            expose_error_type: false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.error, kind = self.error.kind(), "Request failed");
        } else {
            warn!(error = %self.error, kind = self.error.kind(), "Database unavailable");
        }
        (status, Json(self.body())).into_response()
    }
}

/// Request-scoped session extractor.
///
/// The session is released when the handler returns, whether it succeeds or not.
#[derive(Debug)]
pub struct DbSession(pub Session);

impl<S> FromRequestParts<S> for DbSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let session = state
            .manager
            .acquire_session()
            .await
            .map_err(|e| state.reject(e))?;
        Ok(Self(session))
    }
}

async fn health(State(state): State<AppState>) -> Response {
    if state.manager.check_health().await {
        (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
            .into_response()
    }
}

async fn engine_info(State(state): State<AppState>) -> Result<Response, ApiError> {
    let engine = state.manager.get_engine().await.map_err(|e| state.reject(e))?;
    Ok(Json(engine.info()).into_response())
}

async fn ping(
    State(state): State<AppState>,
    DbSession(mut session): DbSession,
) -> Result<Response, ApiError> {
    session
        .execute("SELECT 1")
        .await
        .map_err(|e| state.reject(e))?;
    let body = json!({ "session_id": session.id(), "backend": session.backend() });
    session.close().await.map_err(|e| state.reject(e))?;
    Ok(Json(body).into_response())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(engine_info))
        .route("/ping", get(ping))
        .with_state(state)
}

/// Serve the router until SIGINT/SIGTERM, then dispose of the engine.
pub async fn serve(state: AppState, host: &str, port: u16) -> DbResult<()> {
    let bind_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
        DbError::connection(
            format!("Failed to bind to {}: {}", bind_addr, e),
            "Check that the port is available",
        )
    })?;
    info!(addr = %bind_addr, "HTTP adapter listening");

    let manager = Arc::clone(&state.manager);
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(wait_for_signal())
        .await;

    info!("Closing database connections");
    manager.dispose().await;

    result.map_err(|e| DbError::internal(format!("HTTP server error: {}", e)))
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
