/*
    End-to-End Integration Test

    Wires the board the way the binary does:
    - one KeyManager shared by the store
    - a MessageStore handing new files to replication
    - a ReplicationManager over an in-memory backend
    - a ShutdownCoordinator draining the queue on exit
*/

use chrono::{TimeZone, Utc};
use noticeboard_core::config::ReplicationConfig;
use noticeboard_core::keys::KeyManager;
use noticeboard_core::replication::{MemoryBackend, ReplicationManager, VcsOp, VcsStep};
use noticeboard_core::shutdown::ShutdownCoordinator;
use noticeboard_core::store::{MessageStore, MessageType, StoreError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const TEST_BITS: usize = 1024;

fn open_store(dir: &TempDir) -> MessageStore {
    let keys = Arc::new(KeyManager::open(dir.path().join("keys"), TEST_BITS).unwrap());
    MessageStore::new(dir.path().join("messages"), keys).unwrap()
}

#[tokio::test]
async fn test_post_replicate_and_drain() {
    let dir = TempDir::new().unwrap();
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    let backend = Arc::new(MemoryBackend::new().with_delay(Duration::from_millis(2)));

    let manager = ReplicationManager::start(
        &ReplicationConfig::default(),
        backend.clone(),
        coordinator.subscribe(),
    )
    .await
    .unwrap();
    let store = open_store(&dir).with_replication(manager.handle());

    let mut identifiers = Vec::new();
    for (i, text) in ["first", "second", "third"].iter().enumerate() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, i as u32).unwrap();
        identifiers.push(store.save_at(text, MessageType::Message, at).unwrap());
    }

    coordinator.shutdown().await;
    let stats = manager.wait(coordinator.timeout()).await.unwrap();
    coordinator.complete().await;

    assert_eq!(stats.replicated, 3);
    let expected: Vec<String> = identifiers
        .iter()
        .map(|id| format!("Add message {}", id))
        .collect();
    assert_eq!(backend.pushed_commits(), expected);
    assert_eq!(backend.max_in_flight(), 1);

    let staged: Vec<_> = backend
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            VcsOp::Stage(path) => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(staged[0], store.locator(&identifiers[0]));

    let records = store.list();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| store.verify_record(r)));
}

#[tokio::test]
async fn test_replication_failure_does_not_affect_save() {
    let dir = TempDir::new().unwrap();
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_on(VcsStep::Push);

    let manager = ReplicationManager::start(
        &ReplicationConfig::default(),
        backend.clone(),
        coordinator.subscribe(),
    )
    .await
    .unwrap();
    let store = open_store(&dir).with_replication(manager.handle());

    let id = store.save("kept locally", "system").unwrap();

    coordinator.shutdown().await;
    let stats = manager.wait(coordinator.timeout()).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert!(backend.pushed_commits().is_empty());

    let record = store.get(&id).unwrap().unwrap();
    assert_eq!(record.content, "kept locally");
    assert_eq!(record.kind, MessageType::System);
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let at = Utc.with_ymd_and_hms(2024, 6, 2, 8, 30, 0).unwrap();

    let (fingerprint, id) = {
        let store = open_store(&dir);
        let id = store.save_at("persisted", MessageType::Error, at).unwrap();
        (store.keys().fingerprint().clone(), id)
    };

    let store = open_store(&dir);
    assert_eq!(store.keys().fingerprint(), &fingerprint);
    let records = store.list();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].identifier, id);
    assert_eq!(records[0].date, "2024-06-02T08:30:00Z");
    assert!(store.verify_record(&records[0]));
}

#[test]
fn test_concurrent_saves_in_distinct_seconds() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir));

    let workers: Vec<_> = (0..8u32)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let at = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, i).unwrap();
                store
                    .save_at(&format!("message {}", i), MessageType::Message, at)
                    .unwrap()
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let contents: Vec<String> = store.list().into_iter().map(|r| r.content).collect();
    let expected: Vec<String> = (0..8).map(|i| format!("message {}", i)).collect();
    assert_eq!(contents, expected);
}

#[test]
fn test_concurrent_saves_in_same_second() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir));
    let at = Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || store.save_at(&format!("racer {}", i), MessageType::Message, at))
        })
        .collect();
    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, StoreError::Duplicate(_))));

    let records = store.list();
    assert_eq!(records.len(), 1);
    assert!(store.verify_record(&records[0]));
}

#[test]
fn test_concurrent_key_initialisation_agrees() {
    let dir = TempDir::new().unwrap();
    let keys_dir = dir.path().join("keys");

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let keys_dir = keys_dir.clone();
            thread::spawn(move || {
                KeyManager::open(&keys_dir, TEST_BITS)
                    .unwrap()
                    .fingerprint()
                    .clone()
            })
        })
        .collect();
    let fingerprints: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert!(fingerprints.windows(2).all(|pair| pair[0] == pair[1]));
}
