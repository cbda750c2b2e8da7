//! Web server module.
//!
//! Provides an axum-based HTTP control API through which the backend (or an
//! operator) dispatches tasks, applies uniqueness batches and installs
//! proxies on this agent.

pub mod auth;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::AppState;

/// Build the complete axum router with API routes and static file serving.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = routes::api_router(state.clone());

    Router::new()
        .nest("/api", api_routes)
        // Serve the optional local dashboard build from ./dist/
        .fallback_service(ServeDir::new("dist").append_index_html_on_directories(true))
        .layer(cors)
}

/// Start the web server on the given port.
pub async fn start_server(state: Arc<AppState>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Control API listening on http://0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
