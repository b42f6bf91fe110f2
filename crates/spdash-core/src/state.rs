//! The in-memory State Model.
//!
//! The model holds the last known value of every state variable written by
//! the producer. It has a single writer (the synchronizer) and any number of
//! readers, which take immutable [`StateSnapshot`]s.
//!
//! Updates follow last-write-wins per key: an update older than the stored
//! one is dropped. Equal timestamps are ordered by the store sequence number
//! when both sides carry one, otherwise the later arrival wins.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::value::{SpValue, SpValueType};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// A named state variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateVariable {
    id: String,
    value: SpValue,
    timestamp: Timestamp,
    origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
}

impl StateVariable {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &SpValue {
        &self.value
    }

    pub fn value_type(&self) -> SpValueType {
        self.value.value_type()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }
}

impl From<Update> for StateVariable {
    fn from(u: Update) -> Self {
        Self {
            id: u.id,
            value: u.value,
            timestamp: u.timestamp,
            origin: u.origin,
            sequence: u.sequence,
        }
    }
}

/// An observed write to apply to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub id: String,
    pub value: SpValue,
    pub timestamp: Timestamp,
    pub origin: String,
    pub sequence: Option<u64>,
}

impl Update {
    pub fn new(
        id: impl Into<String>,
        value: SpValue,
        timestamp: Timestamp,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            value,
            timestamp,
            origin: origin.into(),
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: Option<u64>) -> Self {
        self.sequence = sequence;
        self
    }
}

/// Result of [`StateModel::apply_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First write for this key.
    Inserted,
    /// Replaced an older value.
    Updated,
    /// Older than the stored value; dropped.
    Outdated,
    /// Same timestamp and sequence as the stored value; dropped.
    Duplicate,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, ApplyOutcome::Inserted | ApplyOutcome::Updated)
    }
}

/// Why the model is flagged stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StaleReason {
    SubscriptionLost,
    Disconnected,
    HeartbeatTimeout { window_ms: u64 },
    StoreUnavailable(String),
    ResyncFailed(String),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::SubscriptionLost => f.write_str("subscription lost"),
            StaleReason::Disconnected => f.write_str("store disconnected"),
            StaleReason::HeartbeatTimeout { window_ms } => {
                write!(f, "no update within {}ms", window_ms)
            }
            StaleReason::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
            StaleReason::ResyncFailed(msg) => write!(f, "resynchronization failed: {}", msg),
        }
    }
}

/// Non-fatal staleness annotation carried on snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleWarning {
    pub reason: StaleReason,
    /// When the model first became stale.
    pub since: Timestamp,
}

/// Immutable view of the model, ordered by identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub variables: Vec<StateVariable>,
    pub stale: Option<StaleWarning>,
    pub generation: u64,
    pub taken_at: Timestamp,
}

impl StateSnapshot {
    pub fn get(&self, id: &str) -> Option<&StateVariable> {
        self.variables
            .binary_search_by(|v| v.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.variables[i])
    }

    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.id.as_str())
    }
}

#[derive(Debug, Default)]
struct ModelInner {
    variables: BTreeMap<String, StateVariable>,
    stale: Option<StaleWarning>,
    generation: u64,
}

impl ModelInner {
    fn apply(&mut self, update: Update) -> ApplyOutcome {
        let Some(current) = self.variables.get_mut(&update.id) else {
            self.variables
                .insert(update.id.clone(), StateVariable::from(update));
            return ApplyOutcome::Inserted;
        };

        let outcome = if update.timestamp > current.timestamp {
            ApplyOutcome::Updated
        } else if update.timestamp < current.timestamp {
            ApplyOutcome::Outdated
        } else {
            match (update.sequence, current.sequence) {
                (Some(new), Some(old)) if new > old => ApplyOutcome::Updated,
                (Some(new), Some(old)) if new < old => ApplyOutcome::Outdated,
                (Some(_), Some(_)) => ApplyOutcome::Duplicate,
                _ => ApplyOutcome::Updated,
            }
        };

        if outcome == ApplyOutcome::Updated {
            current.value = update.value;
            current.timestamp = update.timestamp;
            current.origin = update.origin;
            current.sequence = update.sequence;
        }
        outcome
    }
}

/// Shared state model. Writes take a short exclusive lock, reads copy out.
#[derive(Debug)]
pub struct StateModel {
    inner: RwLock<ModelInner>,
    changes: watch::Sender<u64>,
}

impl Default for StateModel {
    fn default() -> Self {
        Self::new()
    }
}

impl StateModel {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: RwLock::new(ModelInner::default()),
            changes,
        }
    }

    /// Subscribe to generation changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Apply one observed write under last-write-wins.
    pub fn apply_update(&self, update: Update) -> ApplyOutcome {
        let id = update.id.clone();
        let timestamp = update.timestamp;

        let (outcome, generation) = {
            let mut inner = self.inner.write();
            let outcome = inner.apply(update);
            if outcome.changed() {
                inner.generation += 1;
            }
            (outcome, inner.generation)
        };

        match outcome {
            ApplyOutcome::Outdated => {
                warn!("Dropping out-of-order update for '{}' (ts={})", id, timestamp);
            }
            ApplyOutcome::Duplicate => {
                debug!("Ignoring duplicate update for '{}' (ts={})", id, timestamp);
            }
            _ => self.notify(generation),
        }
        outcome
    }

    /// Copy out the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        StateSnapshot {
            variables: inner.variables.values().cloned().collect(),
            stale: inner.stale.clone(),
            generation: inner.generation,
            taken_at: now_millis(),
        }
    }

    pub fn get(&self, id: &str) -> Option<StateVariable> {
        self.inner.read().variables.get(id).cloned()
    }

    /// Type of the value currently stored for `id`.
    pub fn observed_type(&self, id: &str) -> Option<SpValueType> {
        self.inner.read().variables.get(id).map(|v| v.value_type())
    }

    pub fn len(&self) -> usize {
        self.inner.read().variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stale(&self) -> bool {
        self.inner.read().stale.is_some()
    }

    pub fn stale_warning(&self) -> Option<StaleWarning> {
        self.inner.read().stale.clone()
    }

    /// Flag the model stale. Data is kept.
    ///
    /// An already stale model keeps its original `since` and takes the new
    /// reason. Returns true if the model was not stale before.
    pub fn mark_stale(&self, reason: StaleReason) -> bool {
        let (newly, generation) = {
            let mut inner = self.inner.write();
            match inner.stale.as_mut() {
                Some(warning) if warning.reason == reason => return false,
                Some(warning) => {
                    warning.reason = reason;
                    inner.generation += 1;
                    (false, inner.generation)
                }
                None => {
                    inner.stale = Some(StaleWarning {
                        reason,
                        since: now_millis(),
                    });
                    inner.generation += 1;
                    (true, inner.generation)
                }
            }
        };
        self.notify(generation);
        newly
    }

    /// Remove the stale flag. Returns true if it was set.
    pub fn clear_stale(&self) -> bool {
        let generation = {
            let mut inner = self.inner.write();
            if inner.stale.take().is_none() {
                return false;
            }
            inner.generation += 1;
            inner.generation
        };
        self.notify(generation);
        true
    }

    /// Replace the whole model after a full read. Clears the stale flag.
    ///
    /// Repeated keys in `updates` are merged under last-write-wins.
    pub fn reset(&self, updates: Vec<Update>) {
        let mut fresh = ModelInner::default();
        for update in updates {
            fresh.apply(update);
        }

        let (count, generation) = {
            let mut inner = self.inner.write();
            fresh.generation = inner.generation + 1;
            *inner = fresh;
            (inner.variables.len(), inner.generation)
        };
        debug!("State model reset with {} variables", count);
        self.notify(generation);
    }

    fn notify(&self, generation: u64) {
        self.changes.send_if_modified(|current| {
            if *current < generation {
                *current = generation;
                true
            } else {
                false
            }
        });
    }
}
