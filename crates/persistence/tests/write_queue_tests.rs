//! Write queue integration tests.
//!
//! These tests verify serialization of writes, bounded conflict retry and
//! cache recovery after failed writes, using the in-memory document store's
//! failure injection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use carehub_persistence::error::{ConcurrencyError, StorageError};
use carehub_persistence::remote::RemoteStoreError;
use carehub_persistence::remote::memory::InMemoryDocumentStore;
use carehub_persistence::schema::catalog::platform_schemas;
use carehub_persistence::{CollectionStore, Document, StoreConfig};

const ORDERS_PATH: &str = "data/orders.json";

// ============================================================================
// Helper Functions
// ============================================================================

fn create_store_with_delay(remote: &InMemoryDocumentStore, drain_delay_ms: u64) -> CollectionStore {
    let mut config = StoreConfig::new("carehub", "platform-data");
    config.drain_delay_ms = drain_delay_ms;
    CollectionStore::new(config, platform_schemas(), Arc::new(remote.clone()))
        .expect("Failed to create collection store")
}

fn create_store(remote: &InMemoryDocumentStore) -> CollectionStore {
    create_store_with_delay(remote, 0)
}

fn order_json(user_id: &str, total: u64) -> Value {
    json!({"user_id": user_id, "items": [{"sku": "BP-MONITOR", "qty": 1}], "total": total})
}

fn stored_documents(remote: &InMemoryDocumentStore, path: &str) -> Vec<Document> {
    let content = remote.content(path).expect("collection file should exist");
    serde_json::from_str(&content).expect("collection file should hold an array")
}

// ============================================================================
// Serialization Tests
// ============================================================================

/// Many staged inserts, none awaited individually, all reach the remote.
#[tokio::test]
async fn test_burst_of_inserts_loses_nothing() {
    let remote = InMemoryDocumentStore::new();
    let store = create_store(&remote);

    let mut pending = Vec::new();
    for i in 0..25 {
        let staged = store
            .insert("orders", order_json(&format!("u-{i}"), 10 + i))
            .await
            .expect("Insert should stage");
        pending.push(staged);
    }
    for staged in pending {
        staged.durable().await.expect("Insert should become durable");
    }

    let stored = stored_documents(&remote, ORDERS_PATH);
    assert_eq!(stored.len(), 25);
    let mut ids: Vec<u64> = stored
        .iter()
        .map(|doc| doc["id"].as_str().unwrap().parse().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=25).collect::<Vec<u64>>());
}

/// Mixed mutations across tasks leave the remote equal to the local view.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_do_not_clobber_each_other() {
    let remote = InMemoryDocumentStore::new();
    let store = create_store(&remote);
    for i in 0..5 {
        store
            .insert("orders", order_json(&format!("u-{i}"), 100))
            .await
            .unwrap()
            .durable()
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for id in 1..=5 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .update("orders", &id.to_string(), json!({"status": "shipped"}))
                .await
                .expect("Update should stage")
                .durable()
                .await
                .expect("Update should become durable")
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    let stored = stored_documents(&remote, ORDERS_PATH);
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|doc| doc["status"] == "shipped"));
    assert_eq!(store.get("orders", true).await.unwrap(), stored);
}

/// Writes to different collections all complete and land in their own files.
#[tokio::test]
async fn test_writes_to_several_collections() {
    let remote = InMemoryDocumentStore::new();
    let store = create_store(&remote);

    let order = store.insert("orders", order_json("u-1", 20)).await.unwrap();
    let course = store
        .insert("courses", json!({"title": "First Aid Basics", "instructor_id": "9"}))
        .await
        .unwrap();
    let (_, order_receipt) = order.confirm().await.unwrap();
    let (_, course_receipt) = course.confirm().await.unwrap();

    assert_eq!(order_receipt.collection, "orders");
    assert_eq!(course_receipt.collection, "courses");
    assert_eq!(stored_documents(&remote, "data/courses.json")[0]["published"], false);
}

// ============================================================================
// Conflict Retry Tests
// ============================================================================

/// A persistent conflict gives up after exactly five write attempts.
#[tokio::test]
async fn test_conflict_retry_is_bounded_to_five_attempts() {
    let remote = InMemoryDocumentStore::new();
    remote.seed(ORDERS_PATH, "[]");
    let store = create_store(&remote);
    remote.set_always_conflict(true);

    let result = store
        .insert("orders", order_json("u-1", 42))
        .await
        .expect("Insert should stage")
        .durable()
        .await;

    match result {
        Err(StorageError::Concurrency(ConcurrencyError::RetriesExhausted { attempts, .. })) => {
            assert_eq!(attempts, 5);
        }
        other => panic!("Expected retries exhausted, got {other:?}"),
    }
    assert_eq!(remote.write_count(), 5);
}

/// Transient conflicts are absorbed and reported in the receipt.
#[tokio::test]
async fn test_transient_conflicts_recover() {
    let remote = InMemoryDocumentStore::new();
    remote.seed(ORDERS_PATH, "[]");
    let store = create_store(&remote);
    remote.fail_next_conflicts(4);

    let (doc, receipt) = store
        .insert("orders", order_json("u-1", 42))
        .await
        .unwrap()
        .confirm()
        .await
        .expect("fifth attempt should succeed");

    assert_eq!(receipt.attempts, 5);
    assert_eq!(receipt.token, remote.token(ORDERS_PATH));
    assert_eq!(stored_documents(&remote, ORDERS_PATH), vec![doc]);
}

/// Retries wait the drain delay between attempts.
#[tokio::test(start_paused = true)]
async fn test_conflict_retries_wait_drain_delay() {
    let remote = InMemoryDocumentStore::new();
    remote.seed(ORDERS_PATH, "[]");
    let store = create_store_with_delay(&remote, 250);
    remote.fail_next_conflicts(2);

    let started = tokio::time::Instant::now();
    let receipt = store
        .insert("orders", order_json("u-1", 42))
        .await
        .unwrap()
        .confirm()
        .await
        .unwrap()
        .1;

    assert_eq!(receipt.attempts, 3);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

/// Writes are predicated on the file's current token, not the cached one.
#[tokio::test]
async fn test_write_uses_current_remote_token() {
    let remote = InMemoryDocumentStore::new();
    remote.seed(ORDERS_PATH, "[]");
    let store = create_store(&remote);
    store.get("orders", false).await.unwrap();

    // Stale cache: another writer has moved the file on.
    remote.seed(ORDERS_PATH, r#"[{"id":"1","user_id":"ext","items":[],"total":1}]"#);

    let receipt = store
        .insert("orders", order_json("u-2", 7))
        .await
        .unwrap()
        .confirm()
        .await
        .unwrap()
        .1;
    assert_eq!(receipt.attempts, 1);
    assert_eq!(receipt.token, remote.token(ORDERS_PATH));
}

// ============================================================================
// Failure Recovery Tests
// ============================================================================

/// A rejected write surfaces the error and drops the optimistic state.
#[tokio::test]
async fn test_rejected_write_invalidates_cache() {
    let remote = InMemoryDocumentStore::new();
    remote.seed(ORDERS_PATH, "[]");
    let store = create_store(&remote);
    remote.fail_writes_with(Some(RemoteStoreError::Unavailable("maintenance".into())));

    let staged = store.insert("orders", order_json("u-1", 42)).await.unwrap();
    assert_eq!(store.get("orders", false).await.unwrap().len(), 1);

    let err = staged.durable().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(remote.write_count(), 1);

    remote.fail_writes_with(None);
    assert!(store.get("orders", false).await.unwrap().is_empty());
}

/// A later queued write carries the whole staged array, including the
/// changes of an earlier write that gave up.
#[tokio::test]
async fn test_later_write_carries_changes_of_failed_predecessor() {
    let remote = InMemoryDocumentStore::new();
    remote.seed(ORDERS_PATH, "[]");
    let store = create_store(&remote);
    store.get("orders", false).await.unwrap();
    remote.fail_next_conflicts(5);

    let first = store.insert("orders", order_json("u-1", 1)).await.unwrap();
    let second = store.insert("orders", order_json("u-2", 2)).await.unwrap();

    assert!(matches!(
        first.durable().await,
        Err(StorageError::Concurrency(ConcurrencyError::RetriesExhausted { .. }))
    ));
    second.durable().await.expect("second write should land");

    let stored = stored_documents(&remote, ORDERS_PATH);
    let users: Vec<&str> = stored.iter().map(|doc| doc["user_id"].as_str().unwrap()).collect();
    assert_eq!(users, vec!["u-1", "u-2"]);
    assert_eq!(store.get("orders", false).await.unwrap(), stored);
}

/// After an exhausted write the store keeps working.
#[tokio::test]
async fn test_store_recovers_after_exhausted_write() {
    let remote = InMemoryDocumentStore::new();
    remote.seed(ORDERS_PATH, "[]");
    let store = create_store(&remote);

    remote.set_always_conflict(true);
    let failed = store.insert("orders", order_json("u-1", 1)).await.unwrap();
    assert!(failed.durable().await.is_err());
    remote.set_always_conflict(false);

    let doc = store
        .insert("orders", order_json("u-2", 2))
        .await
        .unwrap()
        .durable()
        .await
        .unwrap();
    assert_eq!(doc["id"], "1");
    assert_eq!(stored_documents(&remote, ORDERS_PATH).len(), 1);
}
