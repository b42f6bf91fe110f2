//! Store client errors.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store client error types.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No connection has been established.
    #[error("Store not connected")]
    NotConnected,

    /// Transient network or protocol failure. Retried by the caller.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation did not complete in time.
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),

    /// The store rejected a command.
    #[error("Command failed: {0}")]
    Command(String),

    /// Connection retries exhausted.
    #[error("Store unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// Invalid connection settings.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Shutdown was requested while the operation was in flight.
    #[error("Store client is shutting down")]
    ShuttingDown,
}

impl StoreError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::NotConnected | StoreError::Connection(_) | StoreError::Timeout(_)
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Unavailable {
            attempts: 4,
            last_error: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Store unavailable after 4 attempts: connection refused"
        );
        assert!(!err.is_transient());
        assert!(StoreError::Timeout(3000).is_transient());
    }
}
