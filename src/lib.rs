//! Media download API service library.
//!
//! Accepts platform URLs over HTTP, fetches the media through an
//! external extractor subprocess, persists artifacts to an object
//! store, and hands clients a time-limited download link. Submission is
//! asynchronous: clients get a job id and poll for progress.
//!
//! # Architecture
//!
//! - [`config`] - environment ingestion
//! - [`db`] - SQLite connectivity and migrations
//! - [`job`] - job entity, state machine, and durable store
//! - [`validate`] - URL validation and normalization
//! - [`net`] - SSRF-safe outbound HTTP and challenge verification
//! - [`dispatch`] - bounded queue + fixed worker pool
//! - [`extractor`] - driver for the external extractor tool
//! - [`storage`] - artifact store backends (object store / local disk)
//! - [`sweeper`] - artifact retention enforcement
//! - [`processor`] - worker body gluing the pieces together
//! - [`http`] - the API surface and its middleware chain

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod dispatch;
pub mod extractor;
pub mod http;
pub mod job;
pub mod net;
pub mod processor;
pub mod storage;
pub mod sweeper;
pub mod validate;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use dispatch::{DispatchError, Dispatcher, ProcessJob};
pub use extractor::{ExtractError, Extraction, Extractor, ExtractorConfig};
pub use http::{AppState, RateLimiter, RateLimiterConfig};
pub use job::{Job, JobStatus, JobStore, StoreError};
pub use net::TurnstileVerifier;
pub use processor::JobProcessor;
pub use storage::{ArtifactStore, LocalStore, R2Config, R2Store, StorageError};
pub use sweeper::{Sweeper, SweeperConfig};
