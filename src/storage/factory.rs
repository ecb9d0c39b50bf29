//! Storage backend factory

use std::sync::Arc;

use crate::config::StorageConfig;

use super::backend::{KeyValueStore, StorageError};
use super::file_backend::FileKvStore;
use super::memory_backend::MemoryKvStore;
use super::redis_backend::RedisKvStore;

/// Create a key-value backend based on configuration.
///
/// Returns the appropriate backend implementation based on the `backend` setting:
/// - `"file"` (default): `FileKvStore` rooted at `path`
/// - `"redis"`: `RedisKvStore` for `redis_url`, keys prefixed with `redis_prefix`
/// - `"memory"`: `MemoryKvStore` (not durable across restarts)
///
/// Unknown values are rejected with `StorageError::UnknownBackend`.
pub fn create_kv_store(settings: &StorageConfig) -> Result<Arc<dyn KeyValueStore>, StorageError> {
    match settings.backend.as_str() {
        "file" => {
            tracing::info!(
                backend = "file",
                path = %settings.path,
                "Creating file storage backend"
            );
            Ok(Arc::new(FileKvStore::new(&settings.path)))
        }
        "redis" => {
            tracing::info!(
                backend = "redis",
                prefix = %settings.redis_prefix,
                "Creating Redis storage backend"
            );
            Ok(Arc::new(RedisKvStore::new(
                &settings.redis_url,
                settings.redis_prefix.clone(),
            )?))
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory storage backend");
            Ok(Arc::new(MemoryKvStore::new()))
        }
        other => {
            tracing::error!(backend = %other, "Unknown storage backend requested");
            Err(StorageError::UnknownBackend(other.to_string()))
        }
    }
}
