//! Redis backend.
//!
//! Reads use `SCAN` + `MGET`, writes use `SET` (pipelined in a `MULTI` for
//! batches). Changes arrive as keyspace notifications on
//! `__keyspace@<db>__:<pattern>`; each `set` event is followed by a `GET`
//! of the key, since notifications carry only the event name.
//!
//! Deletions and expirations are not forwarded. Removed keys disappear from
//! the bridge's view at the next full resynchronization.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use spdash_core::{now_millis, StoreConfig};
use tracing::{debug, info, warn};

use crate::backend::{ChangeStream, StoreBackend, StoreEntry};
use crate::error::{Result, StoreError};

const SCAN_COUNT: usize = 500;
const MGET_CHUNK: usize = 500;

/// Redis implementation of [`StoreBackend`].
pub struct RedisBackend {
    config: StoreConfig,
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisBackend {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url()).map_err(|e| {
            StoreError::InvalidConfiguration(format!(
                "Failed to create Redis client for {}: {}",
                config.display_url(),
                e
            ))
        })?;
        Ok(Self {
            config,
            client,
            connection: Mutex::new(None),
        })
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection.lock().clone().ok_or(StoreError::NotConnected)
    }

    fn keyspace_prefix(&self) -> String {
        format!("__keyspace@{}__:", self.config.db)
    }

    async fn ensure_keyspace_events(&self, conn: &mut ConnectionManager) -> Result<()> {
        let current: Vec<String> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("notify-keyspace-events")
            .query_async(conn)
            .await?;
        let flags = current.get(1).map(String::as_str).unwrap_or_default();

        if let Some(merged) = merge_keyspace_flags(flags) {
            let _: () = redis::cmd("CONFIG")
                .arg("SET")
                .arg("notify-keyspace-events")
                .arg(&merged)
                .query_async(conn)
                .await?;
            info!("Enabled keyspace notifications ({} -> {})", flags, merged);
        }
        Ok(())
    }
}

/// Flags needed for `set` keyspace events, merged into the current setting.
///
/// Returns `None` when the current flags already suffice.
pub fn merge_keyspace_flags(current: &str) -> Option<String> {
    let has_keyspace = current.contains('K');
    let has_strings = current.contains('$') || current.contains('A');
    if has_keyspace && has_strings {
        return None;
    }
    let mut merged = current.to_string();
    if !has_keyspace {
        merged.push('K');
    }
    if !has_strings {
        merged.push('$');
    }
    Some(merged)
}

#[async_trait]
impl StoreBackend for RedisBackend {
    fn backend_type(&self) -> &str {
        "redis"
    }

    async fn connect(&self) -> Result<()> {
        let mut conn = ConnectionManager::new(self.client.clone()).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        if self.config.enable_keyspace_events {
            // Managed deployments often disable CONFIG; the subscription still
            // works if the server was configured externally.
            if let Err(e) = self.ensure_keyspace_events(&mut conn).await {
                warn!("Could not enable keyspace notifications: {}", e);
            }
        }

        *self.connection.lock() = Some(conn);
        debug!("Connected to {}", self.config.display_url());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connection.lock().take();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection()?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn read_all(&self, pattern: &str) -> Result<Vec<StoreEntry>> {
        let mut conn = self.connection()?;

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();

        let observed_at = now_millis();
        let mut entries = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MGET_CHUNK) {
            let mut mget = redis::cmd("MGET");
            for key in chunk {
                mget.arg(key);
            }
            let values: Vec<Option<String>> = mget.query_async(&mut conn).await?;
            // Keys deleted between SCAN and MGET come back as nil.
            entries.extend(
                chunk
                    .iter()
                    .zip(values)
                    .filter_map(|(key, value)| value.map(|raw| StoreEntry::new(key.as_str(), raw, observed_at))),
            );
        }
        Ok(entries)
    }

    async fn subscribe(&self, pattern: &str) -> Result<ChangeStream> {
        let mut conn = self.connection()?;
        let mut pubsub = self.client.get_async_pubsub().await?;
        let prefix = self.keyspace_prefix();
        let channel = format!("{}{}", prefix, pattern);
        pubsub.psubscribe(&channel).await?;
        debug!("Subscribed to {}", channel);

        Ok(Box::pin(async_stream::stream! {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let Some(key) = msg.get_channel_name().strip_prefix(&prefix).map(str::to_string) else {
                    continue;
                };
                let event: String = msg.get_payload().unwrap_or_default();
                if event != "set" {
                    debug!("Ignoring keyspace event '{}' for {}", event, key);
                    continue;
                }

                let value: redis::RedisResult<Option<String>> =
                    redis::cmd("GET").arg(&key).query_async(&mut conn).await;
                match value {
                    Ok(Some(raw)) => {
                        yield StoreEntry::new(key, raw, now_millis());
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Failed to read '{}' after change event: {}", key, e);
                        break;
                    }
                }
            }
            debug!("Keyspace subscription {} ended", channel);
        }))
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let _: () = redis::cmd("SET").arg(key).arg(value).query_async(&mut conn).await?;
        Ok(())
    }

    async fn write_batch(&self, entries: &[(String, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SET").arg(key).arg(value).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
