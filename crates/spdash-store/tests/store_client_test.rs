//! Store Client Tests
//!
//! Exercises the client over the in-memory backend:
//! - full reads and pattern filtering
//! - batch writes
//! - resubscribing after a dropped subscription
//! - connection state notifications
//! - one-shot probes

use std::sync::Arc;

use futures::StreamExt;
use spdash_core::{BackoffConfig, StoreConfig};
use spdash_store::{ConnectionState, MemoryBackend, StoreClient, StoreError};

fn client(backend: Arc<MemoryBackend>) -> StoreClient {
    let config = StoreConfig {
        backoff: BackoffConfig {
            initial_delay_ms: 10,
            max_delay_ms: 100,
            max_retries: Some(2),
            jitter: false,
            ..Default::default()
        },
        ..Default::default()
    };
    StoreClient::new(backend, config)
}

#[tokio::test]
async fn test_read_all_filters_by_pattern() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("robot_mode", "a");
    backend.producer_set("robot_speed", "b");
    backend.producer_set("gripper", "c");

    let client = client(backend);
    client.connect().await.unwrap();

    let robot = client.read_all("robot_*").await.unwrap();
    let keys: Vec<_> = robot.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["robot_mode", "robot_speed"]);
    assert!(robot.iter().all(|e| e.sequence.is_some()));

    assert_eq!(client.read_all("*").await.unwrap().len(), 3);
    assert_eq!(client.read("gripper").await.unwrap().as_deref(), Some("c"));
    assert_eq!(client.metrics().reads, 6);
}

#[tokio::test]
async fn test_write_batch_is_all_or_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client(backend.clone());
    client.connect().await.unwrap();

    let batch = vec![
        ("a".to_string(), "1".to_string()),
        ("b".to_string(), "2".to_string()),
    ];
    backend.fail_next_writes(1);
    assert!(client.write_batch(&batch).await.is_err());
    assert_eq!(backend.get_raw("a"), None);
    assert_eq!(backend.get_raw("b"), None);

    client.write_batch(&batch).await.unwrap();
    assert_eq!(backend.get_raw("a").as_deref(), Some("1"));
    assert_eq!(backend.get_raw("b").as_deref(), Some("2"));
}

#[tokio::test]
async fn test_subscription_must_be_reissued_after_drop() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client(backend.clone());
    client.connect().await.unwrap();

    let mut first = client.subscribe("*").await.unwrap();
    backend.drop_subscriptions();
    assert!(first.next().await.is_none());

    let mut second = client.subscribe("*").await.unwrap();
    client.write("robot_mode", "running").await.unwrap();
    let entry = second.next().await.unwrap();
    assert_eq!(entry.key, "robot_mode");
    assert_eq!(entry.raw, "running");
}

#[tokio::test]
async fn test_connection_state_notifications() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client(backend.clone());
    let mut states = client.subscribe_state();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

    client.connect().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    backend.take_down();
    assert!(matches!(
        client.connect().await,
        Err(StoreError::Unavailable { attempts: 3, .. })
    ));
    assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

    backend.restore();
    client.connect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(client.metrics().reconnects, 1);
}

#[tokio::test]
async fn test_probe_is_a_single_attempt() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client(backend.clone());

    backend.take_down();
    assert!(client.probe().await.is_err());
    assert_eq!(backend.connect_attempts(), 1);
    assert!(client.metrics().last_error.is_some());

    backend.restore();
    client.probe().await.unwrap();
    assert!(backend.is_connected());
    assert_eq!(backend.connect_attempts(), 2);
}
