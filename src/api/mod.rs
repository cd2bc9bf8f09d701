//! HTTP API server for the reflection backend

pub mod health;
pub mod history;
pub mod reflect;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::db::{DbPool, TurnRepo, UserRepo};
use crate::llm::ReflectionEngine;
use crate::reflection::ErrorResponse;
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub users: UserRepo,
    pub turns: TurnRepo,
    /// Tone and reply generator.
    /// Absent when no LLM key is configured; reflect requests then fail.
    pub engine: Option<Arc<dyn ReflectionEngine>>,
}

impl ApiState {
    /// Build state over a pool
    #[must_use]
    pub fn new(db: DbPool, engine: Option<Arc<dyn ReflectionEngine>>) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            turns: TurnRepo::new(db.clone()),
            db,
            engine,
        }
    }
}

/// Errors surfaced to API clients as `{ "error": ... }`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (
            status,
            Json(ErrorResponse {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the router with all routes
pub fn router(state: ApiState, static_dir: Option<&Path>) -> Router {
    let state = Arc::new(state);

    let mut router = Router::new()
        .merge(reflect::router(Arc::clone(&state)))
        .merge(history::router(Arc::clone(&state)))
        .merge(health::router(state));

    if let Some(static_dir) = static_dir {
        let index_file = static_dir.join("index.html");
        let serve_dir =
            ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

        router = router.fallback_service(serve_dir);
        tracing::info!(path = %static_dir.display(), "serving static files");
    }

    // CORS layer for cross-origin requests from the web UI
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// API server bound to a port
pub struct ApiServer {
    state: ApiState,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Create a server
    #[must_use]
    pub const fn new(state: ApiState, port: u16, static_dir: Option<PathBuf>) -> Self {
        Self {
            state,
            port,
            static_dir,
        }
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state, self.static_dir.as_deref()))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
