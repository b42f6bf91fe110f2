//! State Store Client for spdash.
//!
//! The bridge talks to the shared store only through [`StoreClient`], which
//! wraps a [`StoreBackend`]:
//!
//! - [`RedisBackend`]: the production backend, change events via keyspace
//!   notifications
//! - [`MemoryBackend`]: in-process fake with fault injection, used in tests

pub mod backend;
pub mod client;
pub mod error;
pub mod memory;
pub mod redis;

pub use backend::{glob_match, ChangeStream, ConnectionState, StoreBackend, StoreEntry};
pub use client::{StoreClient, StoreMetrics};
pub use error::{Result, StoreError};
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;
