//! In-process store backend.
//!
//! Behaves like a single Redis database with keyspace notifications, and
//! assigns every write a sequence number. Faults can be injected to exercise
//! reconnect and staleness handling without a network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use spdash_core::now_millis;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::backend::{glob_match, ChangeStream, StoreBackend, StoreEntry};
use crate::error::{Result, StoreError};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Faults {
    /// Refuse all connections and operations until cleared.
    down: bool,
    failing_connects: u32,
    failing_reads: u32,
    failing_writes: u32,
}

#[derive(Debug, Clone)]
struct Stored {
    raw: String,
    sequence: u64,
}

/// In-memory [`StoreBackend`].
#[derive(Debug)]
pub struct MemoryBackend {
    data: Mutex<BTreeMap<String, Stored>>,
    faults: Mutex<Faults>,
    connected: AtomicBool,
    next_sequence: AtomicU64,
    connect_attempts: AtomicU64,
    writes: AtomicU64,
    events: broadcast::Sender<StoreEntry>,
    /// Bumped to end every open subscription.
    epoch: watch::Sender<u64>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (epoch, _) = watch::channel(0);
        Self {
            data: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            connected: AtomicBool::new(false),
            next_sequence: AtomicU64::new(1),
            connect_attempts: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            events,
            epoch,
        }
    }

    /// Write a key as the producer would. Works while the bridge is disconnected.
    pub fn producer_set(&self, key: &str, raw: &str) -> u64 {
        self.store(key, raw)
    }

    /// Current raw value of a key.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).map(|s| s.raw.clone())
    }

    /// Delete a key. No event is emitted.
    pub fn remove(&self, key: &str) -> bool {
        self.data.lock().remove(key).is_some()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.faults.lock().failing_connects = n;
    }

    /// Make the next `n` full reads fail.
    pub fn fail_next_reads(&self, n: u32) {
        self.faults.lock().failing_reads = n;
    }

    /// Make the next `n` writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.faults.lock().failing_writes = n;
    }

    /// End every open subscription, as if the pub/sub link dropped.
    pub fn drop_subscriptions(&self) {
        self.epoch.send_modify(|e| *e += 1);
    }

    /// Take the store down: the connection drops and every call fails until
    /// [`restore`](Self::restore).
    pub fn take_down(&self) {
        self.faults.lock().down = true;
        self.connected.store(false, Ordering::SeqCst);
        self.drop_subscriptions();
    }

    pub fn restore(&self) {
        self.faults.lock().down = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of successful bridge-side writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn store(&self, key: &str, raw: &str) -> u64 {
        // Hold the data lock while publishing so events keep write order.
        let mut data = self.data.lock();
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        data.insert(
            key.to_string(),
            Stored {
                raw: raw.to_string(),
                sequence,
            },
        );
        let _ = self
            .events
            .send(StoreEntry::new(key, raw, now_millis()).with_sequence(sequence));
        sequence
    }

    fn check_available(&self) -> Result<()> {
        if self.faults.lock().down {
            return Err(StoreError::Connection("store is down".into()));
        }
        if !self.is_connected() {
            return Err(StoreError::NotConnected);
        }
        Ok(())
    }

    fn take_read_fault(&self) -> Result<()> {
        let mut faults = self.faults.lock();
        if faults.failing_reads > 0 {
            faults.failing_reads -= 1;
            return Err(StoreError::Connection("injected read failure".into()));
        }
        Ok(())
    }

    fn take_write_fault(&self) -> Result<()> {
        let mut faults = self.faults.lock();
        if faults.failing_writes > 0 {
            faults.failing_writes -= 1;
            return Err(StoreError::Connection("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn backend_type(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.faults.lock();
            if faults.down {
                return Err(StoreError::Connection("connection refused".into()));
            }
            if faults.failing_connects > 0 {
                faults.failing_connects -= 1;
                return Err(StoreError::Connection("injected connect failure".into()));
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.drop_subscriptions();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.get_raw(key))
    }

    async fn read_all(&self, pattern: &str) -> Result<Vec<StoreEntry>> {
        self.check_available()?;
        self.take_read_fault()?;
        let observed_at = now_millis();
        Ok(self
            .data
            .lock()
            .iter()
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, s)| StoreEntry::new(key.as_str(), s.raw.as_str(), observed_at).with_sequence(s.sequence))
            .collect())
    }

    async fn subscribe(&self, pattern: &str) -> Result<ChangeStream> {
        self.check_available()?;

        let mut events = self.events.subscribe();
        let mut epoch = self.epoch.subscribe();
        epoch.borrow_and_update();
        let pattern = pattern.to_string();

        Ok(Box::pin(async_stream::stream! {
            loop {
                let event = tokio::select! {
                    _ = epoch.changed() => {
                        debug!("Memory subscription for '{}' dropped", pattern);
                        break;
                    }
                    event = events.recv() => event,
                };
                match event {
                    Ok(entry) if glob_match(&pattern, &entry.key) => {
                        yield entry;
                    }
                    Ok(_) => {}
                    // Missed events mean the subscriber can no longer trust its view.
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Memory subscription lagged by {} events", n);
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        self.take_write_fault()?;
        self.store(key, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_batch(&self, entries: &[(String, String)]) -> Result<()> {
        self.check_available()?;
        self.take_write_fault()?;
        for (key, value) in entries {
            self.store(key, value);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
