// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for instance lock backends.
//!
//! Redis tests require TEST_HELMBROKER_REDIS_URL and are skipped otherwise.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use helmbroker::Error;
use helmbroker::config::LockTiming;
use helmbroker::lock::{FileLock, InstanceLock, LockError, RedisLock, with_instance_lock};
use tempfile::TempDir;

macro_rules! skip_if_no_redis {
    () => {
        if std::env::var("TEST_HELMBROKER_REDIS_URL").is_err() {
            eprintln!("Skipping test: TEST_HELMBROKER_REDIS_URL not set");
            return;
        }
    };
}

fn file_lock() -> (TempDir, Arc<dyn InstanceLock>) {
    let dir = TempDir::new().unwrap();
    let lock: Arc<dyn InstanceLock> = Arc::new(FileLock::new(dir.path()));
    (dir, lock)
}

async fn redis_lock(timing: LockTiming) -> Arc<dyn InstanceLock> {
    let url = std::env::var("TEST_HELMBROKER_REDIS_URL").unwrap();
    Arc::new(RedisLock::connect(&url, timing).await.unwrap())
}

fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Run `workers` critical sections on `instance_id` concurrently and
/// return how many overlapped.
async fn count_overlaps(lock: Arc<dyn InstanceLock>, instance_id: &str, workers: usize) -> usize {
    let inside = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..workers {
        let lock = lock.clone();
        let inside = inside.clone();
        let overlaps = overlaps.clone();
        let instance_id = instance_id.to_string();
        handles.push(tokio::spawn(async move {
            with_instance_lock(lock.as_ref(), &instance_id, || async {
                if inside.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                inside.store(false, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }));
    }
    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }
    overlaps.load(Ordering::SeqCst)
}

// ============================================================================
// File lock
// ============================================================================

#[tokio::test]
async fn test_file_release_is_idempotent() {
    let (dir, lock) = file_lock();
    let mut handle = lock.acquire("inst-1").await.unwrap();
    assert!(handle.is_held());
    assert!(dir.path().join("inst-1/instance.lock").exists());

    handle.release().await.unwrap();
    handle.release().await.unwrap();
    assert!(!handle.is_held());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_same_instance_never_overlaps() {
    let (_dir, lock) = file_lock();
    assert_eq!(count_overlaps(lock, "inst-1", 8).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_same_instance_blocks() {
    let (_dir, lock) = file_lock();
    let mut first = lock.acquire("inst-1").await.unwrap();

    let waiting = tokio::time::timeout(Duration::from_millis(200), lock.acquire("inst-1")).await;
    assert!(waiting.is_err(), "second acquire must wait");

    first.release().await.unwrap();
    let mut second = tokio::time::timeout(Duration::from_secs(5), lock.acquire("inst-1"))
        .await
        .expect("acquire after release")
        .unwrap();
    second.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_different_instances_overlap() {
    let (_dir, lock) = file_lock();
    let mut a = lock.acquire("inst-a").await.unwrap();
    let mut b = tokio::time::timeout(Duration::from_secs(5), lock.acquire("inst-b"))
        .await
        .expect("different ids must not contend")
        .unwrap();
    a.release().await.unwrap();
    b.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_dropped_handle_releases() {
    let (_dir, lock) = file_lock();
    let handle = lock.acquire("inst-1").await.unwrap();
    drop(handle);

    let mut again = tokio::time::timeout(Duration::from_secs(5), lock.acquire("inst-1"))
        .await
        .expect("drop must release")
        .unwrap();
    again.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_released_when_body_fails() {
    let (_dir, lock) = file_lock();
    let result: helmbroker::Result<()> =
        with_instance_lock(lock.as_ref(), "inst-1", || async {
            Err(Error::InvalidRequest("boom".into()))
        })
        .await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));

    let mut again = tokio::time::timeout(Duration::from_secs(5), lock.acquire("inst-1"))
        .await
        .expect("failed body must release")
        .unwrap();
    again.release().await.unwrap();
}

#[tokio::test]
async fn test_file_rejects_unsafe_names() {
    let (_dir, lock) = file_lock();
    let err = lock.acquire("../escape").await.unwrap_err();
    assert!(matches!(err, LockError::InvalidName(_)));
}

// ============================================================================
// Redis lock
// ============================================================================

#[tokio::test]
async fn test_redis_release_is_idempotent() {
    skip_if_no_redis!();
    let lock = redis_lock(LockTiming::default()).await;
    let mut handle = lock.acquire(&unique_id("inst")).await.unwrap();
    handle.release().await.unwrap();
    handle.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_same_instance_never_overlaps() {
    skip_if_no_redis!();
    let timing = LockTiming {
        retry_interval: Duration::from_millis(5),
        ..LockTiming::default()
    };
    let lock = redis_lock(timing).await;
    assert_eq!(count_overlaps(lock, &unique_id("inst"), 8).await, 0);
}

#[tokio::test]
async fn test_redis_acquire_times_out() {
    skip_if_no_redis!();
    let timing = LockTiming {
        acquire_timeout: Duration::from_millis(200),
        retry_interval: Duration::from_millis(20),
        ..LockTiming::default()
    };
    let lock = redis_lock(timing).await;
    let id = unique_id("inst");

    let mut held = lock.acquire(&id).await.unwrap();
    let err = lock.acquire(&id).await.unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));
    held.release().await.unwrap();
}

#[tokio::test]
async fn test_redis_expired_lock_release_fails() {
    skip_if_no_redis!();
    let timing = LockTiming {
        ttl: Duration::from_millis(100),
        ..LockTiming::default()
    };
    let lock = redis_lock(timing).await;
    let id = unique_id("inst");

    let mut handle = lock.acquire(&id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = handle.release().await.unwrap_err();
    assert!(matches!(err, LockError::Expired { .. }));
    // The handle gave up ownership either way.
    handle.release().await.unwrap();
}

#[tokio::test]
async fn test_redis_release_failure_surfaces_distinctly() {
    skip_if_no_redis!();
    let timing = LockTiming {
        ttl: Duration::from_millis(100),
        ..LockTiming::default()
    };
    let lock = redis_lock(timing).await;
    let id = unique_id("inst");

    let result: helmbroker::Result<()> = with_instance_lock(lock.as_ref(), &id, || async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Err(Error::InvalidRequest("body failed".into()))
    })
    .await;

    match result {
        Err(Error::LockRelease {
            operation_error, ..
        }) => {
            assert!(operation_error.unwrap().contains("body failed"));
        }
        other => panic!("expected lock release error, got {:?}", other),
    }
}
