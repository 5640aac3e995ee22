//! rusty-qsl/crates/rq-api/src/middleware.rs Middleware
//!
//! Custom middleware for security, logging, and traffic control.

use axum::http::header::{HeaderName, HeaderValue, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS};
use axum::http::Method;
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Per-request spans and latency/status events through `tracing`.
pub fn standard_middleware() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// The browser gallery may be served from another origin.
pub fn cors_policy() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600))
}

/// Forbids MIME sniffing of served images and JSON.
pub fn nosniff() -> SetResponseHeaderLayer<HeaderValue> {
    header_if_missing(X_CONTENT_TYPE_OPTIONS, "nosniff")
}

pub fn referrer_policy() -> SetResponseHeaderLayer<HeaderValue> {
    header_if_missing(REFERRER_POLICY, "strict-origin-when-cross-origin")
}

fn header_if_missing(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(name, HeaderValue::from_static(value))
}
