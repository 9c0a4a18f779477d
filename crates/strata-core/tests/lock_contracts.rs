//! Contract tests for the storage-backed job lock.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use strata_core::prelude::*;

#[tokio::test]
async fn racing_acquirers_get_exactly_one_lock() {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let lock = DistributedLock::new(Arc::clone(&storage), "locks/catalog-job.lock");
        handles.push(tokio::spawn(async move {
            lock.try_acquire(Duration::from_secs(3600), Some("catalog run".into()))
                .await
                .expect("storage ok")
        }));
    }

    let mut guards = Vec::new();
    let mut refused = 0;
    for handle in handles {
        match handle.await.expect("join") {
            Acquisition::Acquired(guard) => guards.push(guard),
            Acquisition::Held(_) => refused += 1,
        }
    }

    assert_eq!(guards.len(), 1);
    assert_eq!(refused, 15);
    for guard in guards {
        guard.release().await.expect("release");
    }
}

#[tokio::test]
async fn lock_file_is_readable_json() {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let lock = DistributedLock::new(Arc::clone(&storage), "locks/a.lock");
    let Acquisition::Acquired(guard) = lock
        .try_acquire(Duration::from_secs(60), Some("op".into()))
        .await
        .expect("acquire")
    else {
        panic!("fresh lock must be free");
    };

    let raw = storage.get("locks/a.lock").await.expect("lock file");
    let value: serde_json::Value = serde_json::from_slice(&raw).expect("json");
    assert_eq!(value["holderId"], guard.holder_id());
    assert_eq!(value["sequenceNumber"], 1);
    assert_eq!(value["operation"], "op");

    let info = lock.read_lock_info().await.expect("read").expect("present");
    assert!(!info.is_expired());
    guard.release().await.expect("release");
    let info = lock.read_lock_info().await.expect("read").expect("present");
    assert!(info.is_expired());
}

#[tokio::test]
async fn dropped_guard_releases_in_background() {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let lock = DistributedLock::new(Arc::clone(&storage), "locks/b.lock");
    {
        let acquisition = lock
            .try_acquire(Duration::from_secs(60), None)
            .await
            .expect("acquire");
        assert!(matches!(acquisition, Acquisition::Acquired(_)));
    }

    for _ in 0..50 {
        if !lock.is_locked().await.expect("read") {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("dropped guard never released the lock");
}
