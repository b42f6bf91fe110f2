//! State Store Client.
//!
//! Wraps a [`StoreBackend`] with bounded exponential backoff, per-operation
//! timeouts, connection state tracking and metrics. The client owns the
//! [`ConnectionState`]; everyone else observes it through a watch channel.
//!
//! All waits (connect attempts, backoff sleeps, operations) abort as soon as
//! [`StoreClient::shutdown`] is called.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use spdash_core::{now_millis, StoreConfig, Timestamp};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{ChangeStream, ConnectionState, StoreBackend, StoreEntry};
use crate::error::{Result, StoreError};

/// Full reads scan the whole keyspace and get a longer deadline.
const READ_ALL_TIMEOUT_FACTOR: u32 = 10;

/// Connection and traffic counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreMetrics {
    /// Successful connections, including the first.
    pub connects: u64,
    pub reconnects: u64,
    pub connect_failures: u64,
    pub reads: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub events_received: u64,
    pub last_activity: Option<Timestamp>,
    pub last_error: Option<String>,
}

/// Store client shared by the synchronizer and its writer task.
pub struct StoreClient {
    backend: Arc<dyn StoreBackend>,
    config: StoreConfig,
    state: watch::Sender<ConnectionState>,
    metrics: Arc<Mutex<StoreMetrics>>,
    shutdown: watch::Sender<bool>,
}

impl StoreClient {
    pub fn new(backend: Arc<dyn StoreBackend>, config: StoreConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            backend,
            config,
            state,
            metrics: Arc::new(Mutex::new(StoreMetrics::default())),
            shutdown,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend_type(&self) -> &str {
        self.backend.backend_type()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.metrics.lock().clone()
    }

    /// Abort in-flight operations and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!("Store connection: {} -> {}", prev, next);
        }
    }

    /// Note a failure of the current connection, e.g. a lost subscription.
    pub fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    fn record_error(&self, err: &StoreError) {
        let mut metrics = self.metrics.lock();
        metrics.last_error = Some(err.to_string());
    }

    fn touch(&self, f: impl FnOnce(&mut StoreMetrics)) {
        let mut metrics = self.metrics.lock();
        f(&mut metrics);
        metrics.last_activity = Some(now_millis());
    }

    /// Wait for `duration` unless shutdown comes first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(StoreError::ShuttingDown);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = shutdown.wait_for(|stop| *stop) => Err(StoreError::ShuttingDown),
        }
    }

    async fn guarded<T>(
        &self,
        timeout: Duration,
        op: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(StoreError::ShuttingDown);
        }
        tokio::select! {
            result = tokio::time::timeout(timeout, op) => match result {
                Ok(inner) => inner,
                Err(_) => Err(StoreError::Timeout(timeout.as_millis() as u64)),
            },
            _ = shutdown.wait_for(|stop| *stop) => Err(StoreError::ShuttingDown),
        }
    }

    /// Downgrade the state after a failed operation on a live connection.
    fn after_failure(&self, err: &StoreError) {
        self.record_error(err);
        if err.is_transient() && self.connection_state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Degraded);
        }
    }

    fn after_success(&self) {
        if self.connection_state() == ConnectionState::Degraded {
            self.set_state(ConnectionState::Connected);
        }
    }

    async fn run<T>(&self, timeout: Duration, op: impl Future<Output = Result<T>>) -> Result<T> {
        match self.guarded(timeout, op).await {
            Ok(v) => {
                self.after_success();
                Ok(v)
            }
            Err(e) => {
                self.after_failure(&e);
                Err(e)
            }
        }
    }

    /// Connect, retrying per the backoff policy.
    ///
    /// Fails with [`StoreError::Unavailable`] once retries are exhausted and
    /// with [`StoreError::ShuttingDown`] if shutdown is requested meanwhile.
    pub async fn connect(&self) -> Result<()> {
        let backoff = self.config.backoff.clone();
        let mut retries: u32 = 0;
        self.set_state(ConnectionState::Connecting);

        loop {
            let attempt = self
                .guarded(self.config.op_timeout(), self.backend.connect())
                .await;

            let err = match attempt {
                Ok(()) => {
                    let mut metrics = self.metrics.lock();
                    metrics.connects += 1;
                    if metrics.connects > 1 {
                        metrics.reconnects += 1;
                    }
                    metrics.last_activity = Some(now_millis());
                    drop(metrics);

                    info!(
                        "Connected to {} store at {} after {} retries",
                        self.backend.backend_type(),
                        self.config.display_url(),
                        retries
                    );
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Err(StoreError::ShuttingDown) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(StoreError::ShuttingDown);
                }
                Err(e) => e,
            };

            self.metrics.lock().connect_failures += 1;
            self.record_error(&err);

            if matches!(err, StoreError::InvalidConfiguration(_)) {
                self.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
            if !backoff.allows_retry(retries) {
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    "Giving up on {} after {} attempts: {}",
                    self.config.display_url(),
                    retries + 1,
                    err
                );
                return Err(StoreError::Unavailable {
                    attempts: retries + 1,
                    last_error: err.to_string(),
                });
            }

            let delay = backoff.delay_for_attempt(retries);
            retries += 1;
            warn!(
                "Connection attempt {} to {} failed: {}; retrying in {:?}",
                retries,
                self.config.display_url(),
                err,
                delay
            );
            self.set_state(ConnectionState::Degraded);

            if let Err(e) = self.sleep(delay).await {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        }
    }

    /// One connection attempt and a round trip, no retries. Used by
    /// periodic probes.
    pub async fn probe(&self) -> Result<()> {
        let result = self
            .guarded(self.config.op_timeout(), async {
                self.backend.connect().await?;
                self.backend.ping().await
            })
            .await;
        if let Err(e) = &result {
            debug!("Store probe failed: {}", e);
            self.record_error(e);
        }
        result
    }

    pub async fn disconnect(&self) -> Result<()> {
        let result = self.backend.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
        result
    }

    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .run(self.config.op_timeout(), self.backend.read(key))
            .await?;
        self.touch(|m| m.reads += 1);
        Ok(value)
    }

    pub async fn read_all(&self, pattern: &str) -> Result<Vec<StoreEntry>> {
        let timeout = self.config.op_timeout() * READ_ALL_TIMEOUT_FACTOR;
        let entries = self.run(timeout, self.backend.read_all(pattern)).await?;
        self.touch(|m| m.reads += entries.len() as u64);
        debug!("Read {} keys matching '{}'", entries.len(), pattern);
        Ok(entries)
    }

    /// Subscribe to changes. The stream ends on subscription loss or shutdown.
    pub async fn subscribe(&self, pattern: &str) -> Result<ChangeStream> {
        let stream = self
            .run(self.config.op_timeout(), self.backend.subscribe(pattern))
            .await?;

        let metrics = self.metrics.clone();
        let mut shutdown = self.shutdown.subscribe();
        let counted = stream.inspect(move |_| {
            let mut m = metrics.lock();
            m.events_received += 1;
            m.last_activity = Some(now_millis());
        });
        let until_shutdown = counted.take_until(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        });
        Ok(Box::pin(until_shutdown))
    }

    pub async fn write(&self, key: &str, value: &str) -> Result<()> {
        let result = self
            .run(self.config.op_timeout(), self.backend.write(key, value))
            .await;
        self.count_write(&result);
        result
    }

    pub async fn write_batch(&self, entries: &[(String, String)]) -> Result<()> {
        let result = self
            .run(self.config.op_timeout(), self.backend.write_batch(entries))
            .await;
        self.count_write(&result);
        result
    }

    fn count_write(&self, result: &Result<()>) {
        match result {
            Ok(()) => self.touch(|m| m.writes += 1),
            Err(_) => self.metrics.lock().write_failures += 1,
        }
    }
}
