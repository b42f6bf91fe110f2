//! Synchronizer Tests
//!
//! Drives the synchronizer against the in-memory store:
//! - initial full read and live updates
//! - staleness on heartbeat timeout, subscription loss and store outage
//! - full read failures with backoff retries
//! - command validation, ordering and write failures
//! - shutdown

use std::sync::Arc;
use std::time::Duration;

use spdash_core::{
    encode_string, BackoffConfig, ContractVersion, EnvelopeCodec, SpValue, SpValueType,
    StaleReason, StateSchema, StateSnapshot, StoreConfig, SyncConfig, ValidationError, ValueCodec,
    VariableSchema,
};
use spdash_store::{MemoryBackend, StoreClient};
use spdash_sync::{Command, CommandError, SyncState, Synchronizer};

const WAIT: Duration = Duration::from_secs(120);

fn store_config() -> StoreConfig {
    StoreConfig {
        backoff: BackoffConfig {
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            max_retries: Some(3),
            jitter: false,
        },
        ..Default::default()
    }
}

fn start(backend: &Arc<MemoryBackend>, schema: StateSchema, config: SyncConfig) -> Synchronizer {
    let client = StoreClient::new(backend.clone(), store_config());
    Synchronizer::start(client, schema, config)
}

fn quiet_config() -> SyncConfig {
    SyncConfig {
        staleness_window_secs: 0,
        ..Default::default()
    }
}

fn raw(value: &SpValue) -> String {
    encode_string(value)
}

async fn wait_for_state(sync: &Synchronizer, want: SyncState) {
    let mut states = sync.subscribe_state();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", want))
        .unwrap();
}

async fn wait_for_snapshot(sync: &Synchronizer, check: impl Fn(&StateSnapshot) -> bool) -> StateSnapshot {
    let mut changes = sync.subscribe_changes();
    tokio::time::timeout(WAIT, async {
        loop {
            let snap = sync.current_snapshot();
            if check(&snap) {
                return snap;
            }
            changes.changed().await.unwrap();
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

fn value_of(snap: &StateSnapshot, key: &str) -> Option<SpValue> {
    snap.get(key).map(|v| v.value().clone())
}

#[tokio::test]
async fn test_initial_sync_then_live_updates() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("robot_mode", &raw(&SpValue::string("idle")));
    backend.producer_set("speed", &raw(&SpValue::float(0.5)));
    backend.producer_set("garbage", "not json");

    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Live).await;

    let snap = sync.current_snapshot();
    assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["robot_mode", "speed"]);
    assert!(!snap.is_stale());
    assert_eq!(snap.get("robot_mode").unwrap().origin(), "micro_sp");

    backend.producer_set("robot_mode", &raw(&SpValue::string("running")));
    let snap = wait_for_snapshot(&sync, |s| {
        value_of(s, "robot_mode") == Some(SpValue::string("running"))
    })
    .await;
    assert_eq!(snap.len(), 2);

    let status = sync.status();
    assert_eq!(status.counters.full_syncs, 1);
    assert_eq!(status.counters.decode_errors, 1);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_marks_stale_and_recovers() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("robot_mode", &raw(&SpValue::string("running")));

    let config = SyncConfig {
        staleness_window_secs: 5,
        ..Default::default()
    };
    let sync = start(&backend, StateSchema::permissive(), config);
    wait_for_state(&sync, SyncState::Live).await;

    // The producer goes quiet.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(sync.current_machine_state(), SyncState::Stale);

    let snap = sync.current_snapshot();
    assert_eq!(value_of(&snap, "robot_mode"), Some(SpValue::string("running")));
    let warning = snap.stale.expect("snapshot should carry a stale warning");
    assert_eq!(warning.reason, StaleReason::HeartbeatTimeout { window_ms: 5_000 });

    // Renewed producer activity triggers a full resynchronization.
    backend.producer_set("robot_mode", &raw(&SpValue::string("idle")));
    let snap = wait_for_snapshot(&sync, |s| {
        !s.is_stale() && value_of(s, "robot_mode") == Some(SpValue::string("idle"))
    })
    .await;
    assert!(!snap.is_stale());
    assert_eq!(sync.current_machine_state(), SyncState::Live);
    assert_eq!(sync.status().counters.full_syncs, 2);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_only_heartbeat_key_counts() {
    let backend = Arc::new(MemoryBackend::new());
    let config = SyncConfig {
        staleness_window_secs: 5,
        heartbeat_key: Some("heartbeat".into()),
        ..Default::default()
    };
    let sync = start(&backend, StateSchema::permissive(), config);
    wait_for_state(&sync, SyncState::Live).await;

    for i in 0..3 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        backend.producer_set("other", &raw(&SpValue::int(i)));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sync.current_machine_state(), SyncState::Stale);

    sync.shutdown().await;
}

#[tokio::test]
async fn test_subscription_loss_forces_full_resync() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("a", &raw(&SpValue::int(1)));
    backend.producer_set("b", &raw(&SpValue::int(2)));

    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Live).await;
    assert_eq!(sync.current_snapshot().len(), 2);

    // A key removed while the link is down disappears on resync.
    backend.remove("a");
    backend.drop_subscriptions();

    let snap = wait_for_snapshot(&sync, |s| s.get("a").is_none()).await;
    assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["b"]);
    wait_for_state(&sync, SyncState::Live).await;
    assert!(sync.status().counters.full_syncs >= 2);
    assert!(!sync.current_snapshot().is_stale());

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_store_unavailable_stays_stale_until_reconnect() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("robot_mode", &raw(&SpValue::string("idle")));
    backend.take_down();

    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Stale).await;

    let warning = sync.current_snapshot().stale.unwrap();
    assert!(matches!(warning.reason, StaleReason::StoreUnavailable(_)));
    assert_eq!(backend.connect_attempts(), 4);

    // Still stale while the store stays down, across several probes.
    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(sync.current_machine_state(), SyncState::Stale);

    let err = sync
        .submit_command(Command::set("robot_mode", SpValue::string("running")))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::StoreUnavailable(_)));

    backend.restore();
    wait_for_state(&sync, SyncState::Live).await;
    let snap = sync.current_snapshot();
    assert!(!snap.is_stale());
    assert_eq!(value_of(&snap, "robot_mode"), Some(SpValue::string("idle")));

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_resync_skips_probe_wait() {
    let backend = Arc::new(MemoryBackend::new());
    backend.take_down();

    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Stale).await;

    backend.restore();
    assert!(sync.request_resync());
    wait_for_state(&sync, SyncState::Live).await;

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_full_read_retries_then_waits_for_resync() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("robot_mode", &raw(&SpValue::string("idle")));
    // One initial attempt plus three backoff retries.
    backend.fail_next_reads(4);

    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Stale).await;
    let warning = sync.current_snapshot().stale.unwrap();
    assert!(matches!(warning.reason, StaleReason::ResyncFailed(_)));

    // First retry is 100ms out.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sync.status().counters.failed_syncs, 1);

    // Retries of 100, 200 and 400ms, then no more attempts before the probe.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let status = sync.status();
    assert_eq!(status.counters.failed_syncs, 4);
    assert_eq!(status.counters.full_syncs, 0);
    assert_eq!(sync.current_machine_state(), SyncState::Stale);
    assert!(matches!(
        sync.current_snapshot().stale.unwrap().reason,
        StaleReason::ResyncFailed(_)
    ));

    assert!(sync.request_resync());
    wait_for_state(&sync, SyncState::Live).await;
    let snap = sync.current_snapshot();
    assert!(!snap.is_stale());
    assert_eq!(value_of(&snap, "robot_mode"), Some(SpValue::string("idle")));
    assert_eq!(sync.status().counters.full_syncs, 1);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_full_read_recovers_on_probe() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("robot_mode", &raw(&SpValue::string("idle")));
    backend.fail_next_reads(4);

    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Stale).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sync.current_machine_state(), SyncState::Stale);
    assert_eq!(sync.status().counters.failed_syncs, 4);

    // The next probe reaches the store and the full read succeeds.
    tokio::time::sleep(Duration::from_secs(30)).await;
    wait_for_state(&sync, SyncState::Live).await;
    assert_eq!(sync.status().counters.failed_syncs, 4);

    sync.shutdown().await;
}

fn strict_schema() -> StateSchema {
    StateSchema {
        allow_undeclared: false,
        ..StateSchema::permissive()
    }
    .with_variable(
        "robot_mode",
        VariableSchema::new(SpValueType::String).with_allowed(["idle", "running"]),
    )
    .with_variable(
        "speed",
        VariableSchema::new(SpValueType::Float64).with_range(Some(0.0), Some(1.0)),
    )
}

#[tokio::test]
async fn test_out_of_schema_commands_are_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("robot_mode", &raw(&SpValue::string("idle")));
    let sync = start(&backend, strict_schema(), quiet_config());
    wait_for_state(&sync, SyncState::Live).await;
    let before = sync.current_snapshot();

    let rejected = [
        Command::set("robot_mode", SpValue::string("flying")),
        Command::set("robot_mode", SpValue::int(1)),
        Command::set("gripper", SpValue::bool(true)),
        Command::set_text("speed", "fast"),
        Command::set_text("speed", "2.5"),
    ];
    for command in rejected {
        let err = sync.submit_command(command).await.unwrap_err();
        assert!(err.is_rejection(), "unexpected error {:?}", err);
    }

    assert_eq!(backend.write_count(), 0);
    let after = sync.current_snapshot();
    assert_eq!(after.variables, before.variables);
    assert_eq!(after.generation, before.generation);
    assert_eq!(sync.status().counters.commands_rejected, 5);

    sync.shutdown().await;
}

#[tokio::test]
async fn test_command_is_written_and_reflected_by_the_store() {
    let backend = Arc::new(MemoryBackend::new());
    backend.producer_set("counter", &raw(&SpValue::int(5)));
    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Live).await;

    // Text input is parsed against the observed type.
    let receipt = sync
        .submit_command(Command::set_text("counter", "7"))
        .await
        .unwrap();
    assert_eq!(receipt.value, SpValue::int(7));
    assert_eq!(backend.get_raw("counter"), Some(raw(&SpValue::int(7))));

    let snap = wait_for_snapshot(&sync, |s| value_of(s, "counter") == Some(SpValue::int(7))).await;
    assert_eq!(snap.get("counter").unwrap().value_type(), SpValueType::Int64);

    let err = sync
        .submit_command(Command::set_text("counter", "seven"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Validation {
            source: ValidationError::Input { .. },
            ..
        }
    ));

    // Unseen keys default to String.
    let receipt = sync
        .submit_command(Command::set_text("note", "42"))
        .await
        .unwrap();
    assert_eq!(receipt.value, SpValue::string("42"));

    sync.shutdown().await;
}

#[tokio::test]
async fn test_batch_is_validated_as_a_whole() {
    let backend = Arc::new(MemoryBackend::new());
    let sync = start(&backend, strict_schema(), quiet_config());
    wait_for_state(&sync, SyncState::Live).await;

    let err = sync
        .submit_batch(vec![
            Command::set("robot_mode", SpValue::string("running")),
            Command::set("speed", SpValue::float(3.0)),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Validation { ref target, .. } if target == "speed"));
    assert_eq!(backend.write_count(), 0);

    let receipts = sync
        .submit_batch(vec![
            Command::set("robot_mode", SpValue::string("running")),
            Command::set_text("speed", "0.25"),
        ])
        .await
        .unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(backend.write_count(), 1);
    assert_eq!(backend.get_raw("speed"), Some(raw(&SpValue::float(0.25))));

    assert_eq!(
        sync.submit_batch(vec![]).await.unwrap_err(),
        CommandError::EmptyBatch
    );

    sync.shutdown().await;
}

#[tokio::test]
async fn test_commands_are_written_in_submission_order() {
    let backend = Arc::new(MemoryBackend::new());
    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Live).await;

    for i in 0..20 {
        sync.submit_command(Command::set("step", SpValue::int(i)))
            .await
            .unwrap();
    }
    assert_eq!(backend.get_raw("step"), Some(raw(&SpValue::int(19))));
    wait_for_snapshot(&sync, |s| value_of(s, "step") == Some(SpValue::int(19))).await;

    sync.shutdown().await;
}

#[tokio::test]
async fn test_failed_write_does_not_change_machine_state() {
    let backend = Arc::new(MemoryBackend::new());
    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Live).await;

    backend.fail_next_writes(1);
    let err = sync
        .submit_command(Command::set("robot_mode", SpValue::string("running")))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Write(_)));
    assert_eq!(sync.current_machine_state(), SyncState::Live);
    assert!(sync.current_snapshot().get("robot_mode").is_none());
    assert_eq!(sync.status().counters.commands_failed, 1);

    sync.shutdown().await;
}

#[tokio::test]
async fn test_envelope_contract_orders_by_producer_timestamp() {
    let backend = Arc::new(MemoryBackend::new());
    let config = SyncConfig {
        contract: ContractVersion::Envelope,
        ..quiet_config()
    };
    let sync = start(&backend, StateSchema::permissive(), config);
    wait_for_state(&sync, SyncState::Live).await;

    let codec = EnvelopeCodec;
    backend.producer_set("robot_mode", &codec.encode(&SpValue::string("idle"), "cell_1", 10));
    backend.producer_set("robot_mode", &codec.encode(&SpValue::string("running"), "cell_1", 9));
    backend.producer_set("marker", &codec.encode(&SpValue::bool(true), "cell_1", 11));

    let snap = wait_for_snapshot(&sync, |s| s.get("marker").is_some()).await;
    let var = snap.get("robot_mode").unwrap();
    assert_eq!(var.value(), &SpValue::string("idle"));
    assert_eq!(var.timestamp(), 10);
    assert_eq!(var.origin(), "cell_1");
    assert_eq!(sync.status().counters.events_outdated, 1);

    sync.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_connection() {
    let backend = Arc::new(MemoryBackend::new());
    let sync = start(&backend, StateSchema::permissive(), quiet_config());
    wait_for_state(&sync, SyncState::Live).await;
    assert!(backend.is_connected());

    sync.shutdown().await;
    assert_eq!(sync.current_machine_state(), SyncState::ShuttingDown);
    // Ending the subscription on shutdown is not a subscription loss.
    assert!(!sync.current_snapshot().is_stale());
    assert_eq!(sync.status().stale, None);
    assert!(!backend.is_connected());
    assert!(!sync.request_resync());
    assert_eq!(
        sync.submit_command(Command::set("k", SpValue::int(1)))
            .await
            .unwrap_err(),
        CommandError::ShuttingDown
    );
}

#[tokio::test]
async fn test_huge_staleness_window_never_expires() {
    let backend = Arc::new(MemoryBackend::new());
    let config = SyncConfig {
        staleness_window_secs: u64::MAX,
        ..Default::default()
    };
    let sync = start(&backend, StateSchema::permissive(), config);
    wait_for_state(&sync, SyncState::Live).await;

    backend.producer_set("robot_mode", &raw(&SpValue::string("idle")));
    wait_for_snapshot(&sync, |s| value_of(s, "robot_mode").is_some()).await;
    assert_eq!(sync.current_machine_state(), SyncState::Live);

    sync.shutdown().await;
}
