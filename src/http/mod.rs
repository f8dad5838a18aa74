//! HTTP surface: three endpoints behind a strict middleware chain.
//!
//! Outermost first: request-id, access log, panic recovery, 30-second
//! handler timeout, gzip compression, CORS. Inside `/api`, the status
//! route carries the permissive limiter; the download route carries the
//! strict limiter plus (unless skipped) the challenge middleware.
//! Health bypasses all of them.

mod challenge;
mod client_ip;
pub mod handlers;
pub mod ratelimit;

pub use client_ip::client_ip;
pub use ratelimit::{RateLimiter, RateLimiterConfig};

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tower_http::CompressionLevel;

use crate::dispatch::Dispatcher;
use crate::job::JobStore;
use crate::net::turnstile::TurnstileVerifier;

/// Global per-request handler timeout.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// gzip level used for responses.
const COMPRESSION_LEVEL: CompressionLevel = CompressionLevel::Precise(5);

/// CORS preflight cache lifetime.
const CORS_MAX_AGE: Duration = Duration::from_secs(300);

/// Shared state for handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    /// Job repository.
    pub store: JobStore,
    /// Queue + worker pool.
    pub dispatcher: Arc<Dispatcher>,
    /// Challenge verifier; `None` disables verification.
    pub turnstile: Option<Arc<TurnstileVerifier>>,
    /// Strict limiter for the submit endpoint.
    pub strict_limiter: Arc<RateLimiter>,
    /// Permissive limiter for status polling.
    pub status_limiter: Arc<RateLimiter>,
}

/// Builds the full application router.
#[must_use]
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let status_routes = Router::new()
        .route("/status/{job_id}", get(handlers::status))
        .route_layer(from_fn_with_state(
            Arc::clone(&state.status_limiter),
            ratelimit::middleware,
        ));

    // Layer order on entry: strict limiter first, then the challenge.
    let mut download_routes = Router::new().route("/download", post(handlers::download));
    if state.turnstile.is_some() {
        download_routes = download_routes.route_layer(from_fn_with_state(
            state.clone(),
            challenge::middleware,
        ));
    }
    download_routes = download_routes.route_layer(from_fn_with_state(
        Arc::clone(&state.strict_limiter),
        ratelimit::middleware,
    ));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .merge(status_routes)
        .merge(download_routes);

    Router::new()
        .nest("/api", api)
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::new(HANDLER_TIMEOUT))
                .layer(CompressionLayer::new().quality(COMPRESSION_LEVEL))
                .layer(cors_layer(allowed_origins)),
        )
        .with_state(state)
}

/// CORS policy from the configured origin list. A `*` entry allows any
/// origin (development convenience).
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        )
    };

    let layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-ratelimit-remaining"),
            header::RETRY_AFTER,
        ])
        .max_age(CORS_MAX_AGE);

    if allowed_origins.iter().any(|origin| origin == "*") {
        layer.allow_headers(Any)
    } else {
        layer.allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-turnstile-token"),
        ])
    }
}
