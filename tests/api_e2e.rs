//! End-to-end tests for the HTTP surface.
//!
//! These drive the real router (middleware chain included) over an
//! in-memory database, with stub processors standing in for the
//! extractor subprocess.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use mediagrab::http::{router, AppState, RateLimiter, RateLimiterConfig};
use mediagrab::{
    Database, DispatchError, Dispatcher, Job, JobStore, ProcessJob, TurnstileVerifier,
};

const YOUTUBE_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Processor that immediately walks a job to `done`.
struct InstantDone {
    store: JobStore,
}

#[async_trait]
impl ProcessJob for InstantDone {
    async fn process(&self, _cancel: CancellationToken, mut job: Job) {
        job.mark_processing();
        self.store.update(&job).await.expect("update to processing");
        job.title = Some("Never Gonna Give You Up".to_string());
        job.mark_done(format!("https://media.example/{}", job.id));
        self.store.update(&job).await.expect("update to done");
    }
}

/// Processor that parks until cancelled, keeping its worker busy.
struct Parked;

#[async_trait]
impl ProcessJob for Parked {
    async fn process(&self, cancel: CancellationToken, _job: Job) {
        cancel.cancelled().await;
    }
}

struct TestApp {
    app: Router,
    store: JobStore,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

struct TestAppOptions {
    workers: usize,
    queue_size: usize,
    strict: RateLimiterConfig,
    turnstile: Option<Arc<TurnstileVerifier>>,
}

impl Default for TestAppOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_size: 10,
            // Permissive so unrelated scenarios never trip the limiter.
            strict: RateLimiterConfig {
                requests_per_minute: 6000,
                burst: 1000,
                cleanup_interval: Duration::from_secs(600),
            },
            turnstile: None,
        }
    }
}

async fn test_app(options: TestAppOptions) -> TestApp {
    let db = Database::open_in_memory().await.expect("in-memory db");
    let store = JobStore::new(db);
    let dispatcher = Arc::new(Dispatcher::new(options.workers, options.queue_size));

    let state = AppState {
        store: store.clone(),
        dispatcher: Arc::clone(&dispatcher),
        turnstile: options.turnstile,
        strict_limiter: Arc::new(RateLimiter::new(options.strict)),
        status_limiter: Arc::new(RateLimiter::new(RateLimiterConfig {
            requests_per_minute: 6000,
            burst: 1000,
            cleanup_interval: Duration::from_secs(600),
        })),
    };

    let app = router(state, &["*".to_string()])
        .layer(MockConnectInfo(SocketAddr::from(([203, 0, 113, 7], 41000))));

    TestApp {
        app,
        store,
        dispatcher,
        cancel: CancellationToken::new(),
    }
}

fn download_request(url: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/download")
        .header("content-type", "application/json")
        .body(Body::from(format!(r#"{{"url":"{url}"}}"#)))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

// ==================== Admission ====================

#[tokio::test]
async fn test_download_happy_path_reaches_done() {
    let harness = test_app(TestAppOptions::default()).await;
    let processor = Arc::new(InstantDone {
        store: harness.store.clone(),
    });
    harness
        .dispatcher
        .start(processor, &harness.cancel)
        .await;

    let response = harness
        .app
        .clone()
        .oneshot(download_request(YOUTUBE_URL))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    let job_id = body["job_id"].as_str().expect("job_id").to_string();

    // Poll until the stub worker finishes.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = harness
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/status/{job_id}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("status response");
        assert_eq!(response.status(), StatusCode::OK);
        let status = json_body(response).await;

        if status["status"] == "done" {
            assert_eq!(status["progress"], 100);
            assert_eq!(status["title"], "Never Gonna Give You Up");
            assert_eq!(
                status["download_url"],
                format!("https://media.example/{job_id}")
            );
            assert!(status.get("error").is_none());
            assert!(status.get("completed_at").is_some());
            break;
        }

        assert!(
            tokio::time::Instant::now() < deadline,
            "job never reached done: {status}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    harness.dispatcher.stop().await;
}

#[tokio::test]
async fn test_download_rejects_invalid_body() {
    let harness = test_app(TestAppOptions::default()).await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/download")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_BODY");
}

#[tokio::test]
async fn test_download_rejects_disallowed_domain() {
    let harness = test_app(TestAppOptions::default()).await;

    let response = harness
        .app
        .clone()
        .oneshot(download_request("https://example.com/video"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "INVALID_URL");
    assert_eq!(body["error"], "domain not in allowlist");
}

#[tokio::test]
async fn test_download_rejects_private_ip_literal_via_allowlist() {
    let harness = test_app(TestAppOptions::default()).await;

    let response = harness
        .app
        .clone()
        .oneshot(download_request("https://127.0.0.1/foo"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_URL");
}

#[tokio::test]
async fn test_queue_full_returns_503() {
    let harness = test_app(TestAppOptions {
        workers: 1,
        queue_size: 1,
        ..TestAppOptions::default()
    })
    .await;
    harness
        .dispatcher
        .start(Arc::new(Parked), &harness.cancel)
        .await;

    // First job occupies the single worker.
    let first = harness
        .app
        .clone()
        .oneshot(download_request(YOUTUBE_URL))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    // Give the worker a moment to pick it up, freeing the queue slot.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Second fills the queue slot.
    let second = harness
        .app
        .clone()
        .oneshot(download_request(YOUTUBE_URL))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::ACCEPTED);

    // Third has nowhere to go.
    let third = harness
        .app
        .clone()
        .oneshot(download_request(YOUTUBE_URL))
        .await
        .expect("response");
    assert_eq!(third.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(third).await["code"], "QUEUE_FULL");

    harness.cancel.cancel();
    harness.dispatcher.stop().await;
}

// ==================== Rate limiting ====================

#[tokio::test]
async fn test_strict_limiter_admits_burst_then_429() {
    let harness = test_app(TestAppOptions {
        strict: RateLimiterConfig {
            requests_per_minute: 5,
            burst: 2,
            cleanup_interval: Duration::from_secs(600),
        },
        ..TestAppOptions::default()
    })
    .await;

    let mut admitted = 0;
    let mut limited = 0;

    for _ in 0..10 {
        let response = harness
            .app
            .clone()
            .oneshot(download_request(YOUTUBE_URL))
            .await
            .expect("response");

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            assert_eq!(
                response.headers().get("retry-after").map(|v| v.to_str().ok()),
                Some(Some("60"))
            );
            assert_eq!(
                response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .map(|v| v.to_str().ok()),
                Some(Some("0"))
            );
            assert_eq!(json_body(response).await["code"], "RATE_LIMIT");
            limited += 1;
        } else {
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            admitted += 1;
        }
    }

    assert_eq!(admitted, 2, "burst of 2 admits exactly two");
    assert_eq!(limited, 8);
}

#[tokio::test]
async fn test_limiter_tracks_client_ips_independently() {
    let harness = test_app(TestAppOptions {
        strict: RateLimiterConfig {
            requests_per_minute: 5,
            burst: 1,
            cleanup_interval: Duration::from_secs(600),
        },
        ..TestAppOptions::default()
    })
    .await;

    for ip in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
        let request = Request::builder()
            .method("POST")
            .uri("/api/download")
            .header("content-type", "application/json")
            .header("x-real-ip", ip)
            .body(Body::from(format!(r#"{{"url":"{YOUTUBE_URL}"}}"#)))
            .expect("request");

        let response = harness.app.clone().oneshot(request).await.expect("response");
        assert_eq!(
            response.status(),
            StatusCode::ACCEPTED,
            "fresh ip {ip} must pass"
        );
    }
}

#[tokio::test]
async fn test_health_bypasses_limiters() {
    let harness = test_app(TestAppOptions {
        strict: RateLimiterConfig {
            requests_per_minute: 1,
            burst: 1,
            cleanup_interval: Duration::from_secs(600),
        },
        ..TestAppOptions::default()
    })
    .await;

    for _ in 0..20 {
        let response = harness
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}

// ==================== Status ====================

#[tokio::test]
async fn test_status_rejects_malformed_job_id() {
    let harness = test_app(TestAppOptions::default()).await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/status/not-a-uuid")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_JOB_ID");
}

#[tokio::test]
async fn test_status_unknown_job_is_404() {
    let harness = test_app(TestAppOptions::default()).await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/status/0b3118c8-7e4c-4f0a-a620-63dca936b6d0")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "JOB_NOT_FOUND");
}

// ==================== Health & misc ====================

#[tokio::test]
async fn test_health_reports_queue_and_workers() {
    let harness = test_app(TestAppOptions {
        workers: 3,
        queue_size: 10,
        ..TestAppOptions::default()
    })
    .await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queue_size"], 0);
    assert_eq!(body["workers"], 3);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let harness = test_app(TestAppOptions::default()).await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert!(
        response.headers().contains_key("x-request-id"),
        "request id middleware must stamp responses"
    );
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let harness = test_app(TestAppOptions::default()).await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/nonsense")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_wrong_method_is_json_405() {
    let harness = test_app(TestAppOptions::default()).await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/download")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json_body(response).await["code"], "METHOD_NOT_ALLOWED");
}

// ==================== Challenge verification ====================

async fn challenge_app(template: wiremock::ResponseTemplate) -> (TestApp, wiremock::MockServer) {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(template)
        .mount(&server)
        .await;

    let verifier = TurnstileVerifier::with_endpoint(
        reqwest::Client::new(),
        "secret".to_string(),
        url::Url::parse(&format!("{}/siteverify", server.uri())).expect("url"),
    );

    let harness = test_app(TestAppOptions {
        turnstile: Some(Arc::new(verifier)),
        ..TestAppOptions::default()
    })
    .await;

    (harness, server)
}

#[tokio::test]
async fn test_challenge_missing_token_is_400() {
    let (harness, _server) = challenge_app(wiremock::ResponseTemplate::new(200).set_body_json(
        serde_json::json!({"success": true}),
    ))
    .await;

    let response = harness
        .app
        .clone()
        .oneshot(download_request(YOUTUBE_URL))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "TURNSTILE_MISSING");
}

#[tokio::test]
async fn test_challenge_rejected_token_is_403() {
    let (harness, _server) = challenge_app(wiremock::ResponseTemplate::new(200).set_body_json(
        serde_json::json!({"success": false, "error-codes": ["invalid-input-response"]}),
    ))
    .await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/download")
        .header("content-type", "application/json")
        .header("x-turnstile-token", "bad-token")
        .body(Body::from(format!(r#"{{"url":"{YOUTUBE_URL}"}}"#)))
        .expect("request");

    let response = harness.app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["code"], "TURNSTILE_INVALID");
}

#[tokio::test]
async fn test_challenge_provider_failure_is_500() {
    let (harness, _server) = challenge_app(wiremock::ResponseTemplate::new(502)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/download")
        .header("content-type", "application/json")
        .header("x-turnstile-token", "token")
        .body(Body::from(format!(r#"{{"url":"{YOUTUBE_URL}"}}"#)))
        .expect("request");

    let response = harness.app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["code"], "TURNSTILE_ERROR");
}

#[tokio::test]
async fn test_challenge_accepted_token_admits_job() {
    let (harness, _server) = challenge_app(wiremock::ResponseTemplate::new(200).set_body_json(
        serde_json::json!({"success": true}),
    ))
    .await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/download")
        .header("content-type", "application/json")
        .header("x-turnstile-token", "good-token")
        .body(Body::from(format!(r#"{{"url":"{YOUTUBE_URL}"}}"#)))
        .expect("request");

    let response = harness.app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

// ==================== Queue-full admission ====================

#[tokio::test]
async fn test_queue_full_rejection_leaves_no_orphan_rows() {
    // No workers started and a tiny queue: the early admission check
    // turns the second submit away before any row is inserted.
    let harness = test_app(TestAppOptions {
        workers: 1,
        queue_size: 1,
        ..TestAppOptions::default()
    })
    .await;

    let first = harness
        .app
        .clone()
        .oneshot(download_request(YOUTUBE_URL))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = harness
        .app
        .clone()
        .oneshot(download_request(YOUTUBE_URL))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Exactly one pending (queued) and zero dangling non-terminal rows
    // beyond it.
    assert_eq!(
        harness
            .store
            .count_by_status(mediagrab::JobStatus::Pending)
            .await
            .expect("count"),
        1
    );

    // Direct enqueue race check at the dispatcher level.
    let job = Job::new(
        uuid::Uuid::new_v4().to_string(),
        YOUTUBE_URL.to_string(),
    );
    assert_eq!(
        harness.dispatcher.enqueue(job),
        Err(DispatchError::QueueFull)
    );
}
