//! Axum server hosting one or more replay collections.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, Request},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::collection::{Collection, ReplayRequest};
use crate::error::Error;
use crate::util::not_found;

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for development (allows any origin).
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_permissive: true,
        }
    }
}

/// Shared server state: the collections, in dispatch order.
#[derive(Clone)]
pub struct AppState {
    collections: Arc<Vec<Collection>>,
}

impl AppState {
    pub fn new(collections: Vec<Collection>) -> Self {
        Self {
            collections: Arc::new(collections),
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    collections: usize,
}

/// Health check endpoint handler.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        collections: state.collections.len(),
    })
}

/// Fallback handler: offer the request to each collection in order; the
/// first one whose prefix matches produces the response.
async fn dispatch(State(state): State<AppState>, req: Request<Body>) -> Result<Response, Error> {
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let replay = ReplayRequest {
        url: url.clone(),
        method: req.method().clone(),
        headers: req.headers().clone(),
    };

    for collection in state.collections.iter() {
        if let Some(response) = collection.handle_request(&replay).await? {
            return Ok(response);
        }
    }

    Ok(not_found(&format!(
        "<p>No collection serves <b>{url}</b>.</p>"
    )))
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, cors_permissive: bool) -> Router {
    let cors = if cors_permissive {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::HEAD])
            .allow_headers([header::CONTENT_TYPE, header::RANGE])
    } else {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::HEAD])
            .allow_headers([header::CONTENT_TYPE, header::RANGE])
    };

    Router::new()
        .route("/api/health", get(health))
        .fallback(dispatch)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the web server.
///
/// This starts the Axum server and blocks until shutdown.
pub async fn run_server(state: AppState, config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app = build_router(state, config.cors_permissive);

    tracing::info!("Starting replay server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
