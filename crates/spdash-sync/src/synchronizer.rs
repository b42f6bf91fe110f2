//! The synchronizer engine.
//!
//! One background task owns the store subscription and is the only writer
//! to the [`StateModel`]. A second task drains the outbound command queue,
//! so store writes happen in submission order. [`Synchronizer`] is a cheap
//! cloneable handle to both.
//!
//! ## Lifecycle
//!
//! 1. Connect with backoff (`Initializing`).
//! 2. Open the subscription, then read every key and `reset` the model
//!    (`Syncing`). Events that arrive during the read are buffered in the
//!    subscription and applied afterwards under last-write-wins.
//! 3. Apply change events (`Live`) until the subscription ends, the store
//!    disconnects, or no heartbeat arrives within the staleness window.
//! 4. Flag the model stale (`Stale`) and start over from step 1. After
//!    heartbeat staleness the connection is still up, so the engine waits
//!    for the producer to write again before resynchronizing.

use std::future::pending;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use spdash_core::{
    now_millis, ApplyOutcome, StaleReason, StateModel, StateSchema, StateSnapshot, SyncConfig,
    Update, ValidationError, ValueCodec,
};
use spdash_store::{ChangeStream, ConnectionState, StoreClient, StoreEntry, StoreError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::command::{Command, CommandError, CommandReceipt, CommandValue};
use crate::machine::{SyncCounters, SyncState, SyncStatus};

/// A queued store write with its reply channel.
struct Outbound {
    entries: Vec<(String, String)>,
    reply: oneshot::Sender<Result<(), StoreError>>,
}

struct Shared {
    client: Arc<StoreClient>,
    model: Arc<StateModel>,
    schema: Arc<StateSchema>,
    codec: Arc<dyn ValueCodec>,
    config: SyncConfig,
    key_pattern: String,
    state: watch::Sender<SyncState>,
    outbound: mpsc::Sender<Outbound>,
    resync: mpsc::Sender<()>,
    shutdown: watch::Sender<bool>,
    counters: Mutex<SyncCounters>,
}

impl Shared {
    fn set_state(&self, next: SyncState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!("Synchronizer: {} -> {}", prev, next);
        }
    }

    fn current_state(&self) -> SyncState {
        *self.state.borrow()
    }

    fn go_stale(&self, reason: StaleReason) {
        warn!("State is stale: {}", reason);
        self.model.mark_stale(reason);
        self.set_state(SyncState::Stale);
    }

    fn decode(&self, entry: StoreEntry) -> Option<Update> {
        match self.codec.decode(&entry.raw) {
            Ok(decoded) => Some(
                Update::new(
                    entry.key,
                    decoded.value,
                    decoded.timestamp.unwrap_or(entry.observed_at),
                    decoded
                        .origin
                        .unwrap_or_else(|| self.config.default_origin.clone()),
                )
                .with_sequence(entry.sequence),
            ),
            Err(e) => {
                warn!("Skipping undecodable value for '{}': {}", entry.key, e);
                self.counters.lock().decode_errors += 1;
                None
            }
        }
    }

    fn apply(&self, entry: StoreEntry) {
        let Some(update) = self.decode(entry) else {
            return;
        };
        debug!("Applying update for '{}' (ts={})", update.id, update.timestamp);
        let outcome = self.model.apply_update(update);
        let mut counters = self.counters.lock();
        match outcome {
            ApplyOutcome::Inserted | ApplyOutcome::Updated => counters.events_applied += 1,
            ApplyOutcome::Outdated => counters.events_outdated += 1,
            ApplyOutcome::Duplicate => {}
        }
    }

    fn is_heartbeat(&self, key: &str) -> bool {
        self.config
            .heartbeat_key
            .as_deref()
            .map_or(true, |beat| beat == key)
    }
}

/// How the live phase ended.
enum LiveExit {
    Shutdown,
    SubscriptionLost,
    Disconnected,
    Resync,
}

/// What to do after waiting in the stale state.
enum Retry {
    Again,
    Stop,
}

/// Handle to a running synchronizer.
#[derive(Clone)]
pub struct Synchronizer {
    shared: Arc<Shared>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Synchronizer {
    /// Start the engine and writer tasks on the current runtime.
    pub fn start(client: StoreClient, schema: StateSchema, config: SyncConfig) -> Self {
        let key_pattern = client.config().key_pattern.clone();
        let codec = spdash_core::codec_for(config.contract);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.command_queue_capacity);
        let (resync_tx, resync_rx) = mpsc::channel(1);
        let (state, _) = watch::channel(SyncState::Initializing);
        let (shutdown, _) = watch::channel(false);

        info!(
            "Starting synchronizer: backend={}, pattern='{}', contract={}",
            client.backend_type(),
            key_pattern,
            config.contract.as_str()
        );

        let shared = Arc::new(Shared {
            client: Arc::new(client),
            model: Arc::new(StateModel::new()),
            schema: Arc::new(schema),
            codec,
            config,
            key_pattern,
            state,
            outbound: outbound_tx,
            resync: resync_tx,
            shutdown,
            counters: Mutex::new(SyncCounters::default()),
        });

        let engine = tokio::spawn(run_engine(shared.clone(), resync_rx));
        let writer = tokio::spawn(run_writer(shared.clone(), outbound_rx));

        Self {
            shared,
            tasks: Arc::new(Mutex::new(vec![engine, writer])),
        }
    }

    pub fn current_snapshot(&self) -> StateSnapshot {
        self.shared.model.snapshot()
    }

    pub fn current_machine_state(&self) -> SyncState {
        self.shared.current_state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.client.connection_state()
    }

    /// Model generation changes. Read the new data with [`current_snapshot`](Self::current_snapshot).
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.shared.model.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.shared.state.subscribe()
    }

    pub fn schema(&self) -> &StateSchema {
        &self.shared.schema
    }

    pub fn status(&self) -> SyncStatus {
        let model = &self.shared.model;
        SyncStatus {
            state: self.shared.current_state(),
            connection: self.shared.client.connection_state(),
            backend: self.shared.client.backend_type().to_string(),
            stale: model.stale_warning(),
            generation: model.generation(),
            variables: model.len(),
            counters: self.shared.counters.lock().clone(),
            store: self.shared.client.metrics(),
        }
    }

    /// Ask for a full resynchronization. Coalesces with a pending request.
    pub fn request_resync(&self) -> bool {
        if self.shared.current_state() == SyncState::ShuttingDown {
            return false;
        }
        match self.shared.resync.try_send(()) {
            Ok(()) => {
                info!("Manual resynchronization requested");
                true
            }
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Check a command against the schema and resolve its value.
    fn resolve(&self, command: &Command) -> Result<spdash_core::SpValue, CommandError> {
        let target = command.target.as_str();
        let observed = self.shared.model.observed_type(target);
        let schema = &self.shared.schema;
        let result = match &command.value {
            CommandValue::Typed(value) => schema
                .validate(target, value, observed)
                .map(|()| value.clone()),
            CommandValue::Text(text) => schema.validate_input(target, text, observed),
        };
        result.map_err(|source: ValidationError| {
            warn!(
                "Rejected command {} '{}' for '{}': {}",
                command.id, command.name, target, source
            );
            self.shared.counters.lock().commands_rejected += 1;
            CommandError::Validation {
                target: target.to_string(),
                source,
            }
        })
    }

    fn check_writable(&self) -> Result<(), CommandError> {
        if self.shared.current_state() == SyncState::ShuttingDown {
            return Err(CommandError::ShuttingDown);
        }
        let connection = self.shared.client.connection_state();
        if !connection.is_connected() {
            return Err(CommandError::StoreUnavailable(format!(
                "store is {}",
                connection
            )));
        }
        Ok(())
    }

    async fn enqueue(&self, entries: Vec<(String, String)>) -> Result<(), CommandError> {
        let (reply, response) = oneshot::channel();
        self.shared
            .outbound
            .send(Outbound { entries, reply })
            .await
            .map_err(|_| CommandError::ShuttingDown)?;

        let result = response.await.map_err(|_| CommandError::ShuttingDown)?;
        result.map_err(|e| {
            self.shared.counters.lock().commands_failed += 1;
            match e {
                StoreError::ShuttingDown => CommandError::ShuttingDown,
                StoreError::NotConnected | StoreError::Unavailable { .. } => {
                    CommandError::StoreUnavailable(e.to_string())
                }
                other => CommandError::Write(other.to_string()),
            }
        })
    }

    fn encode(&self, value: &spdash_core::SpValue, at: spdash_core::Timestamp) -> String {
        self.shared
            .codec
            .encode(value, &self.shared.config.command_origin, at)
    }

    /// Validate and write one command.
    ///
    /// The model is not touched; the written value shows up once the store
    /// reports it back through the subscription.
    pub async fn submit_command(&self, command: Command) -> Result<CommandReceipt, CommandError> {
        let value = self.resolve(&command)?;
        self.check_writable()?;

        let now = now_millis();
        let raw = self.encode(&value, now);
        self.enqueue(vec![(command.target.clone(), raw)]).await?;

        self.shared.counters.lock().commands_accepted += 1;
        info!("Command {} wrote '{}' = {}", command.id, command.target, value);
        Ok(CommandReceipt {
            command_id: command.id,
            target: command.target,
            value,
            accepted_at: now_millis(),
        })
    }

    /// Validate every command, then write them all in one batch.
    ///
    /// Nothing is written if any command fails validation.
    pub async fn submit_batch(
        &self,
        commands: Vec<Command>,
    ) -> Result<Vec<CommandReceipt>, CommandError> {
        if commands.is_empty() {
            return Err(CommandError::EmptyBatch);
        }
        let values = commands
            .iter()
            .map(|c| self.resolve(c))
            .collect::<Result<Vec<_>, _>>()?;
        self.check_writable()?;

        let now = now_millis();
        let entries = commands
            .iter()
            .zip(&values)
            .map(|(c, v)| (c.target.clone(), self.encode(v, now)))
            .collect();
        self.enqueue(entries).await?;

        let accepted_at = now_millis();
        self.shared.counters.lock().commands_accepted += commands.len() as u64;
        info!("Command batch of {} written", commands.len());
        Ok(commands
            .into_iter()
            .zip(values)
            .map(|(c, value)| CommandReceipt {
                command_id: c.id,
                target: c.target,
                value,
                accepted_at,
            })
            .collect())
    }

    /// Stop both tasks, release the connection and wait for them to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down synchronizer");
        self.shared.set_state(SyncState::ShuttingDown);
        self.shared.shutdown.send_replace(true);
        self.shared.client.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Synchronizer task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_engine(shared: Arc<Shared>, mut resync: mpsc::Receiver<()>) {
    let mut shutdown = shared.shutdown.subscribe();
    let backoff = shared.client.config().backoff.clone();
    let mut sync_failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match shared.client.connect().await {
            Ok(()) => {}
            Err(StoreError::ShuttingDown) => break,
            Err(e) => {
                shared.go_stale(StaleReason::StoreUnavailable(e.to_string()));
                match wait_for_retry(&shared, &mut resync, &mut shutdown).await {
                    Retry::Again => continue,
                    Retry::Stop => break,
                }
            }
        }

        shared.set_state(SyncState::Syncing);
        let mut stream = match full_sync(&shared).await {
            Ok(stream) => {
                sync_failures = 0;
                stream
            }
            Err(StoreError::ShuttingDown) => break,
            Err(e) => {
                shared.counters.lock().failed_syncs += 1;
                shared.client.mark_disconnected();
                shared.go_stale(StaleReason::ResyncFailed(e.to_string()));

                if !backoff.allows_retry(sync_failures) {
                    warn!("Resynchronization retries exhausted");
                    sync_failures = 0;
                    match wait_for_retry(&shared, &mut resync, &mut shutdown).await {
                        Retry::Again => continue,
                        Retry::Stop => break,
                    }
                }
                let delay = backoff.delay_for_attempt(sync_failures);
                sync_failures += 1;
                warn!("Full read failed: {}; retrying in {:?}", e, delay);
                if shared.client.sleep(delay).await.is_err() {
                    break;
                }
                continue;
            }
        };

        shared.set_state(SyncState::Live);

        match run_live(&shared, &mut stream, &mut resync, &mut shutdown).await {
            LiveExit::Shutdown => break,
            LiveExit::Resync => {}
            LiveExit::SubscriptionLost => {
                shared.client.mark_disconnected();
                shared.go_stale(StaleReason::SubscriptionLost);
            }
            LiveExit::Disconnected => shared.go_stale(StaleReason::Disconnected),
        }
    }

    shared.set_state(SyncState::ShuttingDown);
    if let Err(e) = shared.client.disconnect().await {
        debug!("Disconnect on shutdown failed: {}", e);
    }
    info!("Synchronizer stopped");
}

/// Subscribe, then read everything and replace the model.
async fn full_sync(shared: &Shared) -> Result<ChangeStream, StoreError> {
    let stream = shared.client.subscribe(&shared.key_pattern).await?;
    let entries = shared.client.read_all(&shared.key_pattern).await?;
    let total = entries.len();

    let updates: Vec<Update> = entries
        .into_iter()
        .filter_map(|entry| shared.decode(entry))
        .collect();
    let decoded = updates.len();
    shared.model.reset(updates);

    {
        let mut counters = shared.counters.lock();
        counters.full_syncs += 1;
        counters.last_full_sync = Some(now_millis());
    }
    info!("Full synchronization loaded {} of {} keys", decoded, total);
    Ok(stream)
}

async fn run_live(
    shared: &Shared,
    stream: &mut ChangeStream,
    resync: &mut mpsc::Receiver<()>,
    shutdown: &mut watch::Receiver<bool>,
) -> LiveExit {
    let window = shared.config.staleness_window();
    let mut connection = shared.client.subscribe_state();
    connection.borrow_and_update();
    let mut last_beat = Instant::now();
    let mut heartbeat_stale = false;

    loop {
        let deadline = window.and_then(|w| last_beat.checked_add(w));
        let heartbeat_timer = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => return LiveExit::Shutdown,
            Some(()) = resync.recv() => return LiveExit::Resync,
            changed = connection.changed() => {
                if changed.is_err() || *connection.borrow_and_update() == ConnectionState::Disconnected {
                    return LiveExit::Disconnected;
                }
            }
            event = stream.next() => {
                let Some(entry) = event else {
                    // The client ends the stream on shutdown too.
                    if *shutdown.borrow() {
                        return LiveExit::Shutdown;
                    }
                    return LiveExit::SubscriptionLost;
                };
                let beat = shared.is_heartbeat(&entry.key);
                if heartbeat_stale {
                    // Resync from the store rather than patch a stale model.
                    if beat {
                        info!("Producer activity resumed on '{}'", entry.key);
                        return LiveExit::Resync;
                    }
                    continue;
                }
                if beat {
                    last_beat = Instant::now();
                }
                shared.apply(entry);
            }
            _ = heartbeat_timer, if !heartbeat_stale => {
                let window_ms = window.map(|w| w.as_millis() as u64).unwrap_or_default();
                shared.go_stale(StaleReason::HeartbeatTimeout { window_ms });
                heartbeat_stale = true;
            }
        }
    }
}

/// Stay stale until a manual request, a successful probe, or shutdown.
async fn wait_for_retry(
    shared: &Shared,
    resync: &mut mpsc::Receiver<()>,
    shutdown: &mut watch::Receiver<bool>,
) -> Retry {
    let interval = shared.config.probe_interval();
    loop {
        tokio::select! {
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => return Retry::Stop,
            Some(()) = resync.recv() => return Retry::Again,
            _ = tokio::time::sleep(interval) => {
                if shared.client.probe().await.is_ok() {
                    info!("Store probe succeeded");
                    return Retry::Again;
                }
            }
        }
    }
}

async fn run_writer(shared: Arc<Shared>, mut queue: mpsc::Receiver<Outbound>) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let job = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let result = match job.entries.as_slice() {
            [(key, value)] => shared.client.write(key, value).await,
            entries => shared.client.write_batch(entries).await,
        };
        if let Err(e) = &result {
            warn!("Store write of {} keys failed: {}", job.entries.len(), e);
        }
        // The caller may have given up waiting.
        let _ = job.reply.send(result);
    }

    queue.close();
    while let Ok(job) = queue.try_recv() {
        let _ = job.reply.send(Err(StoreError::ShuttingDown));
    }
    debug!("Command writer stopped");
}
