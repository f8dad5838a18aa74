//! Bot-challenge middleware for the download endpoint.
//!
//! Reads the challenge token from its request header and verifies it
//! against the provider before the request reaches the handler. When no
//! verifier is configured (`TURNSTILE_SKIP`, or no secret) requests pass
//! through; the router also skips mounting this layer in that case.

use std::net::SocketAddr;

use axum::extract::{connect_info::ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use super::client_ip::client_ip;
use super::handlers::ApiError;
use super::AppState;
use crate::net::turnstile::TOKEN_HEADER;

/// Axum middleware enforcing challenge verification.
pub async fn middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(verifier) = &state.turnstile else {
        return next.run(request).await;
    };

    let token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string);

    let Some(token) = token else {
        return ApiError::turnstile_missing().into_response();
    };

    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let remote_ip = client_ip(request.headers(), socket);

    match verifier.verify(&token, &remote_ip).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            warn!(ip = %remote_ip, "invalid turnstile token");
            ApiError::turnstile_invalid().into_response()
        }
        Err(err) => {
            error!(ip = %remote_ip, error = %err, "turnstile verification error");
            ApiError::turnstile_error().into_response()
        }
    }
}
