//! API server entry point: wiring and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mediagrab::http::{self, AppState, RateLimiter, RateLimiterConfig};
use mediagrab::{
    ArtifactStore, Config, Database, Dispatcher, Extractor, ExtractorConfig, JobProcessor,
    JobStore, LocalStore, R2Store, Sweeper, SweeperConfig, TurnstileVerifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(&config);

    let db = Database::open(&config.data_dir)
        .await
        .context("failed to initialize database")?;
    let store = JobStore::new(db.clone());

    // Jobs orphaned in `processing` by a previous run get a terminal
    // state before anything new is admitted.
    store
        .fail_interrupted()
        .await
        .context("failed to sweep interrupted jobs")?;

    let extractor = Arc::new(Extractor::new(ExtractorConfig {
        output_dir: config.temp_dir.clone(),
        max_file_size: config.max_file_size,
        max_duration_secs: config.max_duration_secs,
        ..ExtractorConfig::default()
    }));

    if let Err(error) = extractor.check_binary().await {
        warn!(%error, "extractor binary check failed; downloads will error");
    }

    let (artifacts, remote_store): (Arc<dyn ArtifactStore>, Option<Arc<dyn ArtifactStore>>) =
        if config.r2().is_complete() {
            match R2Store::new(&config.r2()) {
                Ok(r2) => {
                    let r2: Arc<dyn ArtifactStore> = Arc::new(r2);
                    (Arc::clone(&r2), Some(r2))
                }
                Err(error) => {
                    warn!(%error, "object store unavailable, falling back to local storage");
                    (Arc::new(LocalStore::new(config.temp_dir.clone())), None)
                }
            }
        } else {
            warn!("object store not configured, using local storage (development only)");
            (Arc::new(LocalStore::new(config.temp_dir.clone())), None)
        };

    let turnstile = if config.turnstile_skip {
        warn!("turnstile verification skipped by configuration");
        None
    } else if config.turnstile_secret_key.is_empty() {
        warn!("TURNSTILE_SECRET_KEY not set, challenge verification disabled");
        None
    } else {
        Some(Arc::new(
            TurnstileVerifier::new(config.turnstile_secret_key.clone())
                .context("failed to build turnstile verifier")?,
        ))
    };

    let strict_limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        requests_per_minute: config.rate_limit_rpm,
        burst: config.rate_limit_burst,
        ..RateLimiterConfig::default()
    }));
    let status_limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        requests_per_minute: config.status_rate_limit_rpm,
        burst: config.status_rate_limit_burst,
        ..RateLimiterConfig::default()
    }));

    let dispatcher = Arc::new(Dispatcher::new(config.max_workers, config.max_queue_size));
    let processor = Arc::new(JobProcessor::new(
        store.clone(),
        Arc::clone(&extractor),
        Arc::clone(&artifacts),
        config.presigned_url_expiry,
    ));

    let cancel = CancellationToken::new();

    dispatcher
        .start(processor, &cancel)
        .await;

    let sweeper = Sweeper::new(SweeperConfig {
        local_dir: Some(config.temp_dir.clone()),
        local_max_age: mediagrab::sweeper::DEFAULT_LOCAL_MAX_AGE,
        local_interval: config.local_cleanup_interval,
        remote: remote_store,
        remote_max_age: config.r2_max_file_age,
        remote_interval: config.r2_cleanup_interval,
    });
    let mut background = sweeper.start(&cancel);
    background.push(strict_limiter.start_cleanup(&cancel));
    background.push(status_limiter.start_cleanup(&cancel));

    let state = AppState {
        store,
        dispatcher: Arc::clone(&dispatcher),
        turnstile,
        strict_limiter,
        status_limiter,
    };
    let app = http::router(state, &config.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(port = config.port, env = %config.env, "server starting");

    // In-flight requests are bounded by the 30 s handler timeout, which
    // also bounds the graceful drain below.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel.clone()))
    .await
    .context("server error")?;

    info!("shutting down");

    dispatcher.stop().await;
    for handle in background {
        let _ = handle.await;
    }
    db.close().await;

    info!("shutdown complete");
    Ok(())
}

/// Sets up the tracing subscriber: JSON in production, human-readable
/// otherwise. `RUST_LOG` overrides the configured level.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.is_production() {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on SIGINT or SIGTERM and cancels the process-wide token.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received");
    cancel.cancel();
}
