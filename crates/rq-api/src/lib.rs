//! # rq-api
//!
//! The web routing and orchestration layer for rusty-qsl.

pub mod error;
pub mod handlers;
pub mod middleware;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

pub use error::ApiError;
pub use handlers::AppState;

/// Builds the API router.
///
/// # Developer Note
/// Static assets and local media are mounted by the binary, so the router can
/// be nested or tested on its own.
pub fn configure_routes(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // The gallery listing
        .route("/qsl", get(handlers::list_qsl))
        .route("/debug/qsl", get(handlers::debug_qsl))
        // Card creation (multipart)
        .route(
            "/upload",
            post(handlers::upload_qsl).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        // Callsign search
        .route("/download", get(handlers::search_by_query))
        .route("/download/{call}", get(handlers::search_by_path))
        // Attachment download; public ids contain slashes
        .route("/file", get(handlers::file_by_query))
        .route("/file/{*public_id}", get(handlers::file_by_path))
        .with_state(state)
        .layer(middleware::nosniff())
        .layer(middleware::referrer_policy())
        .layer(middleware::cors_policy())
        .layer(middleware::standard_middleware())
}
