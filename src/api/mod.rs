//! HTTP API module for the hearth timer service.
//!
//! Provides REST endpoints mapping 1:1 onto engine operations, recipient
//! management, and a websocket carrying the realtime frames.

mod errors;
mod handlers;
mod responses;

pub use errors::ApiError;
pub use handlers::ApiState;
pub use responses::*;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::TimerEngine;
use crate::realtime::Broadcaster;
use crate::storage::Storage;

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8430,
        }
    }
}

impl ApiConfig {
    /// Create a new API config with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Build the API router with all endpoints.
pub fn build_router<S: Storage + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Timers
        .route(
            "/api/timers",
            post(handlers::create_timer::<S>).get(handlers::list_timers::<S>),
        )
        .route("/api/timers/prune", post(handlers::prune_timers::<S>))
        .route("/api/timers/{timer_id}", get(handlers::get_timer::<S>))
        .route(
            "/api/timers/{timer_id}/start",
            post(handlers::start_timer::<S>),
        )
        .route(
            "/api/timers/{timer_id}/pause",
            post(handlers::pause_timer::<S>),
        )
        .route(
            "/api/timers/{timer_id}/unpause",
            post(handlers::unpause_timer::<S>),
        )
        .route(
            "/api/timers/{timer_id}/add-time",
            post(handlers::add_time::<S>),
        )
        .route(
            "/api/timers/{timer_id}/cancel",
            post(handlers::cancel_timer::<S>),
        )
        .route(
            "/api/timers/{timer_id}/finish",
            post(handlers::finish_timer::<S>),
        )
        // Recipients
        .route(
            "/api/timers/{timer_id}/recipients",
            post(handlers::add_recipient::<S>).get(handlers::list_recipients::<S>),
        )
        .route(
            "/api/recipients/{recipient_id}",
            delete(handlers::remove_recipient::<S>),
        )
        // Realtime
        .route("/api/ws", get(handlers::realtime::<S>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from the engine and the realtime fan-out.
pub fn create_api_state<S: Storage>(
    engine: Arc<TimerEngine<S>>,
    broadcaster: Arc<Broadcaster>,
) -> ApiState<S> {
    ApiState {
        engine,
        broadcaster,
    }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<S: Storage + 'static>(
    config: ApiConfig,
    state: ApiState<S>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr = config
        .socket_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
