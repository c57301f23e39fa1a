//! HTTP server: WebSocket upgrade endpoint and health check.
//!
//! # Routes
//!
//! - `GET /ws[?project_id=..][&board_id=..]` - upgrade to a sync session
//! - `GET /health` - liveness probe with the current client count
//!
//! # Shutdown
//!
//! When the cancel token fires the server stops the hub first (every
//! session's queue is closed, so writers send close frames), then lets
//! in-flight HTTP requests finish within `server.shutdown_grace_ms`.

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::hub::HubHandle;

mod origin;
mod upgrade;

pub use origin::{policy_from_config, AllowAnyOrigin, AllowedOrigins, OriginPolicy};
pub use upgrade::{run_session, ws_handler, ScopeQuery};

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "cartographer";

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The HTTP server failed while running.
    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server task panicked or was aborted.
    #[error("server task failed: {0}")]
    Task(String),
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub config: Arc<Config>,
    pub origins: Arc<dyn OriginPolicy>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub clients: usize,
    pub timestamp: DateTime<Utc>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        clients: state.hub.client_count(),
        timestamp: Utc::now(),
    })
}

/// Builds the router with tracing and CORS middleware.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable allowed origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

// ============================================================================
// Sync Server
// ============================================================================

/// The HTTP front of the sync hub.
pub struct SyncServer {
    config: Arc<Config>,
    hub: HubHandle,
    origins: Arc<dyn OriginPolicy>,
    cancel_token: CancellationToken,
}

impl SyncServer {
    /// Creates a server whose origin policy follows `server.allowed_origins`.
    pub fn new(config: Config, hub: HubHandle, cancel_token: CancellationToken) -> Self {
        let origins = policy_from_config(&config.server.allowed_origins);
        Self {
            config: Arc::new(config),
            hub,
            origins,
            cancel_token,
        }
    }

    /// Replaces the origin policy.
    #[must_use]
    pub fn with_origin_policy(mut self, policy: Arc<dyn OriginPolicy>) -> Self {
        self.origins = policy;
        self
    }

    /// The application router, without a listener.
    pub fn router(&self) -> Router {
        router(AppState {
            hub: self.hub.clone(),
            config: Arc::clone(&self.config),
            origins: Arc::clone(&self.origins),
        })
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.server.socket_addr();
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Binds and serves until cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serves on an already-bound listener until the cancel token fires.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        let app = self.router();
        let grace = self.config.server.shutdown_grace();

        info!(addr = %addr, "Sync server listening");

        let stop = self.cancel_token.clone();
        let mut server = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .into_future(),
        );

        tokio::select! {
            result = &mut server => {
                // Stopped without being asked to.
                self.hub.shutdown().await;
                return flatten(result);
            }
            _ = self.cancel_token.cancelled() => {}
        }

        info!(clients = self.hub.client_count(), "Shutting down: closing sessions");
        self.hub.shutdown().await;

        match timeout(grace, &mut server).await {
            Ok(result) => {
                info!("Sync server stopped");
                flatten(result)
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Shutdown grace elapsed, aborting server"
                );
                server.abort();
                Ok(())
            }
        }
    }
}

fn flatten(result: Result<io::Result<()>, tokio::task::JoinError>) -> Result<(), ServerError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Server error");
            Err(ServerError::Io(e))
        }
        Err(e) => Err(ServerError::Task(e.to_string())),
    }
}
