//! HTTP handlers and the API error envelope.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::job::{DownloadRequest, DownloadResponse, HealthResponse, Job};
use crate::validate::{normalize_url, validate_url};

/// JSON error body: `{"error": "...", "code": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// An API-level failure with its HTTP mapping.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// 400 `INVALID_BODY`.
    #[must_use]
    pub fn invalid_body() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "INVALID_BODY",
            "invalid request body",
        )
    }

    /// 400 `INVALID_URL` with the validator's reason.
    #[must_use]
    pub fn invalid_url(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_URL", reason)
    }

    /// 400 `TURNSTILE_MISSING`.
    #[must_use]
    pub fn turnstile_missing() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "TURNSTILE_MISSING",
            "turnstile token required",
        )
    }

    /// 403 `TURNSTILE_INVALID`.
    #[must_use]
    pub fn turnstile_invalid() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "TURNSTILE_INVALID",
            "invalid turnstile token",
        )
    }

    /// 500 `TURNSTILE_ERROR`: the provider could not be consulted.
    #[must_use]
    pub fn turnstile_error() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "TURNSTILE_ERROR",
            "turnstile verification failed",
        )
    }

    /// 429 `RATE_LIMIT` with `Retry-After` and `X-RateLimit-Remaining`.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT",
            "rate limit exceeded",
        )
    }

    /// 503 `QUEUE_FULL`.
    #[must_use]
    pub fn queue_full() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_FULL",
            "server is busy, please try again later",
        )
    }

    /// 500 `DB_ERROR`.
    #[must_use]
    pub fn db_error(context: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR", context)
    }

    /// 400 `INVALID_JOB_ID`.
    #[must_use]
    pub fn invalid_job_id() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "INVALID_JOB_ID",
            "invalid job_id format",
        )
    }

    /// 404 `JOB_NOT_FOUND`.
    #[must_use]
    pub fn job_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "JOB_NOT_FOUND", "job not found")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        let mut response = (self.status, body).into_response();

        if self.status == StatusCode::TOO_MANY_REQUESTS {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        }

        response
    }
}

/// `GET /api/health`. Bypasses both limiters.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        queue_size: state.dispatcher.queue_len(),
        workers: state.dispatcher.worker_count(),
    })
}

/// `POST /api/download`: the admission path.
pub async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|_| ApiError::invalid_body())?;

    if let Err(reason) = validate_url(&request.url) {
        warn!(url = %request.url, %reason, "URL validation failed");
        return Err(ApiError::invalid_url(reason.to_string()));
    }

    // Early admission check; the enqueue below still races and handles
    // the full case itself.
    if state.dispatcher.is_full() {
        return Err(ApiError::queue_full());
    }

    let job = Job::new(Uuid::new_v4().to_string(), normalize_url(&request.url));
    let job_id = job.id.clone();

    if let Err(err) = state.store.create(&job).await {
        error!(%job_id, error = %err, "failed to create job");
        return Err(ApiError::db_error("failed to create job"));
    }

    if let Err(err) = state.dispatcher.enqueue(job.clone()) {
        warn!(%job_id, error = %err, "failed to enqueue job");

        // The row exists; leave it in a terminal state for pollers.
        let mut failed = job;
        failed.mark_error("QUEUE_FULL");
        if let Err(update_err) = state.store.update(&failed).await {
            error!(%job_id, error = %update_err, "failed to mark unqueued job");
        }

        return Err(ApiError::queue_full());
    }

    info!(%job_id, url = %request.url, "download job created");

    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadResponse { job_id }),
    ))
}

/// `GET /api/status/{job_id}`.
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if Uuid::parse_str(&job_id).is_err() {
        return Err(ApiError::invalid_job_id());
    }

    let job = state.store.get(&job_id).await.map_err(|err| {
        error!(%job_id, error = %err, "failed to load job");
        ApiError::db_error("failed to get job status")
    })?;

    match job {
        Some(job) => Ok(Json(job.to_status_response())),
        None => Err(ApiError::job_not_found()),
    }
}

/// JSON 404 for undefined routes.
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "not found".to_string(),
            code: "NOT_FOUND",
        }),
    )
        .into_response()
}

/// JSON 405 for known routes hit with the wrong method.
pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorBody {
            error: "method not allowed".to_string(),
            code: "METHOD_NOT_ALLOWED",
        }),
    )
        .into_response()
}
