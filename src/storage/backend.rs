//! Backend trait for durable key-value storage.
//!
//! The outbox persists two independent records (the backlog and the metrics
//! accumulator) as opaque documents under stable keys. This module defines
//! the storage seam so memory, file and Redis implementations can be used
//! interchangeably.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key cannot be mapped onto the backend
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Backend is temporarily unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Configured backend name is not supported
    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),
}

/// Durable key-value storage.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; they are shared between the
/// orchestrator, the flusher and background tasks.
///
/// # Atomicity
///
/// `set` must replace the whole value atomically: a concurrent or later
/// `get` observes either the previous value or the new one, never a mix.
/// Read-modify-write sequences are serialized by the caller.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend type identifier
    fn backend_type(&self) -> &'static str;

    /// Fetch the raw document stored under `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the document stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the document stored under `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
