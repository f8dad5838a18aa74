//! Integration tests for the job store against a file-backed database.

use chrono::Utc;
use mediagrab::{Database, Job, JobStatus, JobStore};
use tempfile::TempDir;

/// Helper to create a store on a real database file.
async fn setup_store() -> (JobStore, TempDir) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let db = Database::open(temp_dir.path())
        .await
        .expect("failed to open database");
    (JobStore::new(db), temp_dir)
}

fn pending_job(id: &str) -> Job {
    Job::new(
        id.to_string(),
        "https://www.youtube.com/watch?v=abc".to_string(),
    )
}

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let temp_dir = TempDir::new().expect("temp dir");

    {
        let db = Database::open(temp_dir.path()).await.expect("open");
        let store = JobStore::new(db.clone());
        store.create(&pending_job("persist-1")).await.expect("create");
        db.close().await;
    }

    let db = Database::open(temp_dir.path()).await.expect("reopen");
    let store = JobStore::new(db);
    let job = store
        .get("persist-1")
        .await
        .expect("get")
        .expect("row should survive reopen");
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_done_invariants_hold_after_roundtrip() {
    let (store, _guard) = setup_store().await;

    let mut job = pending_job("done-1");
    store.create(&job).await.expect("create");

    job.mark_processing();
    store.update(&job).await.expect("update");
    job.set_progress(37);
    store
        .update_progress(&job.id, job.progress)
        .await
        .expect("progress");

    job.title = Some("Clip".to_string());
    job.mark_done("https://media.example/signed".to_string());
    store.update(&job).await.expect("terminal update");

    let stored = store.get("done-1").await.expect("get").expect("row");
    assert_eq!(stored.status, JobStatus::Done);
    assert_eq!(stored.progress, 100);
    assert!(stored.download_url.is_some());
    assert!(stored.error.is_none());
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_error_invariants_hold_after_roundtrip() {
    let (store, _guard) = setup_store().await;

    let mut job = pending_job("err-1");
    store.create(&job).await.expect("create");

    job.mark_processing();
    job.mark_error("VIDEO_UNAVAILABLE");
    store.update(&job).await.expect("update");

    let stored = store.get("err-1").await.expect("get").expect("row");
    assert_eq!(stored.status, JobStatus::Error);
    assert_eq!(stored.error.as_deref(), Some("VIDEO_UNAVAILABLE"));
    assert!(stored.download_url.is_none());
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_progress_writes_race_free_with_reads() {
    let (store, _guard) = setup_store().await;
    store.create(&pending_job("race-1")).await.expect("create");

    let writer_store = store.clone();
    let writer = tokio::spawn(async move {
        for percent in 0..=100_i64 {
            writer_store
                .update_progress("race-1", percent)
                .await
                .expect("progress write");
        }
    });

    // Reads always observe a committed value, never a torn one.
    for _ in 0..50 {
        let job = store.get("race-1").await.expect("get").expect("row");
        assert!((0..=100).contains(&job.progress));
    }

    writer.await.expect("writer task");

    let job = store.get("race-1").await.expect("get").expect("row");
    assert_eq!(job.progress, 100);
}

#[tokio::test]
async fn test_status_listing_and_counts_stay_consistent() {
    let (store, _guard) = setup_store().await;

    for i in 0..4 {
        store
            .create(&pending_job(&format!("bulk-{i}")))
            .await
            .expect("create");
    }

    let mut done = store.get("bulk-0").await.expect("get").expect("row");
    done.mark_processing();
    done.mark_done("file:///artifact".to_string());
    store.update(&done).await.expect("update");

    let mut failed = store.get("bulk-1").await.expect("get").expect("row");
    failed.mark_error("TIMEOUT");
    store.update(&failed).await.expect("update");

    assert_eq!(
        store
            .count_by_status(JobStatus::Pending)
            .await
            .expect("count"),
        2
    );
    assert_eq!(
        store.count_by_status(JobStatus::Done).await.expect("count"),
        1
    );
    assert_eq!(
        store
            .count_by_status(JobStatus::Error)
            .await
            .expect("count"),
        1
    );

    let pending = store
        .list_by_status(JobStatus::Pending)
        .await
        .expect("list");
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|job| job.status == JobStatus::Pending));
}

#[tokio::test]
async fn test_retention_delete_respects_age() {
    let (store, _guard) = setup_store().await;

    let mut aged = pending_job("aged");
    aged.created_at = Utc::now() - chrono::Duration::minutes(90);
    store.create(&aged).await.expect("create");
    store.create(&pending_job("recent")).await.expect("create");

    let deleted = store
        .delete_older_than(std::time::Duration::from_secs(3600))
        .await
        .expect("delete");

    assert_eq!(deleted, 1);
    assert!(store.get("aged").await.expect("get").is_none());
    assert!(store.get("recent").await.expect("get").is_some());
}

#[tokio::test]
async fn test_interrupted_sweep_then_admission_continues() {
    let (store, _guard) = setup_store().await;

    let mut stuck = pending_job("stuck");
    stuck.mark_processing();
    store.create(&stuck).await.expect("create");

    assert_eq!(store.fail_interrupted().await.expect("sweep"), 1);
    // Second sweep finds nothing.
    assert_eq!(store.fail_interrupted().await.expect("sweep"), 0);

    let stored = store.get("stuck").await.expect("get").expect("row");
    assert_eq!(stored.status, JobStatus::Error);
    assert!(stored.completed_at.is_some());
}
