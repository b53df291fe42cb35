//! # memebrane HTTP API Module
//!
//! A thin JSON surface over the fetch controller, the registry and the
//! core query engine.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Cache row counts
//! - `GET /brain/{brain}` - Redirect to the brain's entry-point node
//! - `GET /brain/{brain}/thought/{id}` - Node, neighbours, gate counts and notes
//!   (`?force=true`, `?full=true`, `?private=true`)
//! - `POST /brain/{brain}/thought/{id}/refresh` - Forced refetch (admin key)
//! - `GET /brain/{brain}/search?q=...` - Full-text search
//! - `GET /brain/{brain}/attachment/{id}` - Attachment content
//!
//! `{brain}` is a brain UUID or a configured slug.
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `MEMEBRANE_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `MEMEBRANE_ADMIN_KEY`: Bearer key required by the refresh route

mod auth;
mod handlers;
mod types;

pub use handlers::{
    attachment_handler, brain_handler, health_handler, refresh_handler, search_handler,
    status_handler, thought_handler,
};
pub use types::{
    ApiError, ErrorResponse, HealthResponse, RefreshResponse, RenderedNote, SearchQuery,
    StatusResponse, ThoughtQuery, ThoughtResponse,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use memebrane_core::{EntityStore, MemebraneError};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::fetch::FetchController;
use crate::registry::BrainRegistry;
use crate::remote::RemoteGraph;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state. Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub controller: FetchController,
    pub registry: BrainRegistry,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: Arc<EntityStore>, remote: Arc<dyn RemoteGraph>) -> Self {
        let controller = FetchController::new(Arc::clone(&store), remote, config.staleness());
        let registry = BrainRegistry::new(store, config.brains.clone(), config.registry_ttl());
        Self {
            controller,
            registry,
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from `MEMEBRANE_CORS_ORIGINS`.
///
/// - "*": allows all origins
/// - unset: localhost only
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    match std::env::var("MEMEBRANE_CORS_ORIGINS").ok().as_deref() {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins (MEMEBRANE_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();
            if allowed.is_empty() {
                tracing::warn!("CORS: No valid origins in MEMEBRANE_CORS_ORIGINS, using localhost");
                build_localhost_cors()
            } else {
                restricted_cors(allowed)
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    restricted_cors(origins)
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    if state.config.admin_key.is_none() {
        tracing::info!("No admin key configured, refresh route disabled");
    }

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/brain/{brain}", get(handlers::brain_handler))
        .route("/brain/{brain}/thought/{id}", get(handlers::thought_handler))
        .route(
            "/brain/{brain}/thought/{id}/refresh",
            post(handlers::refresh_handler),
        )
        .route("/brain/{brain}/search", get(handlers::search_handler))
        .route(
            "/brain/{brain}/attachment/{id}",
            get(handlers::attachment_handler),
        )
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve until Ctrl+C.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), MemebraneError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| MemebraneError::Config(format!("Bind failed: {}", e)))?;

    tracing::info!("memebrane HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
            }
        })
        .await
        .map_err(|e| MemebraneError::Config(format!("Server error: {}", e)))
}
