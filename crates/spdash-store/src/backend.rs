//! Store backend capability trait.
//!
//! A backend speaks to one concrete store. It makes single attempts only;
//! retries, backoff, timeouts and connection state live in
//! [`StoreClient`](crate::StoreClient).
//!
//! ## Example
//!
//! ```rust,ignore
//! use spdash_store::{MemoryBackend, StoreBackend};
//!
//! let backend = MemoryBackend::new();
//! backend.connect().await?;
//! backend.write("robot_mode", r#"{"type":"String","value":{"String":"idle"}}"#).await?;
//!
//! let mut changes = backend.subscribe("robot_*").await?;
//! while let Some(entry) = changes.next().await {
//!     println!("{} = {}", entry.key, entry.raw);
//! }
//! ```

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use spdash_core::Timestamp;

use crate::error::Result;

/// A key and its raw stored string, as observed by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
    pub key: String,
    pub raw: String,
    /// When the bridge observed the value.
    pub observed_at: Timestamp,
    /// Store-assigned write sequence, if the store provides one.
    pub sequence: Option<u64>,
}

impl StoreEntry {
    pub fn new(key: impl Into<String>, raw: impl Into<String>, observed_at: Timestamp) -> Self {
        Self {
            key: key.into(),
            raw: raw.into(),
            observed_at,
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// Change events from a subscription.
///
/// The stream ends when the subscription is lost. It cannot be restarted;
/// subscribe again after reconnecting.
pub type ChangeStream = Pin<Box<dyn Stream<Item = StoreEntry> + Send>>;

/// Connection status, owned by the store client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but recent operations failed or are being retried.
    Degraded,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Operations every store backend provides.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Short backend name for logs.
    fn backend_type(&self) -> &str;

    /// Make one connection attempt.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    /// Read one key. `Ok(None)` when the key does not exist.
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Read every key matching a glob pattern.
    async fn read_all(&self, pattern: &str) -> Result<Vec<StoreEntry>>;

    /// Subscribe to writes on keys matching a glob pattern.
    async fn subscribe(&self, pattern: &str) -> Result<ChangeStream>;

    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Write several keys in one round trip. Either all are written or none.
    async fn write_batch(&self, entries: &[(String, String)]) -> Result<()>;
}

/// Redis-style glob match supporting `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_at(&p, &t)
}

fn glob_at(p: &[char], t: &[char]) -> bool {
    let Some((&first, rest)) = p.split_first() else {
        return t.is_empty();
    };
    match first {
        '*' => (0..=t.len()).any(|i| glob_at(rest, &t[i..])),
        '?' => !t.is_empty() && glob_at(rest, &t[1..]),
        '[' => {
            let Some((&c, t_rest)) = t.split_first() else {
                return false;
            };
            let Some(close) = rest.iter().position(|&ch| ch == ']') else {
                return c == '[' && glob_at(rest, t_rest);
            };
            let (class, after) = (&rest[..close], &rest[close + 1..]);
            let (negate, class) = match class.split_first() {
                Some(('^', tail)) => (true, tail),
                _ => (false, class),
            };
            let mut hit = false;
            let mut i = 0;
            while i < class.len() {
                if i + 2 < class.len() && class[i + 1] == '-' {
                    hit |= class[i] <= c && c <= class[i + 2];
                    i += 3;
                } else {
                    hit |= class[i] == c;
                    i += 1;
                }
            }
            hit != negate && glob_at(after, t_rest)
        }
        '\\' if !rest.is_empty() => {
            !t.is_empty() && t[0] == rest[0] && glob_at(&rest[1..], &t[1..])
        }
        c => !t.is_empty() && t[0] == c && glob_at(rest, &t[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*", ""));
        assert!(glob_match("robot_*", "robot_mode"));
        assert!(!glob_match("robot_*", "gripper"));
        assert!(glob_match("r?bot", "robot"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("x[a-c]", "xb"));
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
    }

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Degraded.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
