//! Route definitions

use super::handlers;
use super::state::AppState;
use axum::{
    http::HeaderName,
    routing::{delete, get},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(handlers::CORRELATION_HEADER)]);

    Router::new()
        .route("/search", get(handlers::search).post(handlers::search_json))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/cache", delete(handlers::invalidate_cache))
        .layer(cors)
        .with_state(state)
}
