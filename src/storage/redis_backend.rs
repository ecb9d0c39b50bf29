//! Redis key-value backend.
//!
//! Documents are stored as plain string values under `{prefix}:{key}`.
//! `SET` replaces a value atomically, which is all the outbox needs.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use tokio::sync::RwLock;

use super::backend::{KeyValueStore, StorageError};

/// Redis key-value backend.
///
/// Holds one multiplexed connection shared across tasks. The connection is
/// established lazily and dropped after an I/O error so the next call
/// reconnects.
pub struct RedisKvStore {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    prefix: String,
}

impl RedisKvStore {
    /// Create a backend for `url`. No connection is made until first use.
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
            prefix: prefix.into(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, StorageError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;

        // Double-check in case another task connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                tracing::info!("Redis storage connection established");
                Ok(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(StorageError::Redis(e))
            }
        }
    }

    async fn execute<F, T, Fut>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    // Clear the connection so next call will reconnect
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                }
                Err(StorageError::Redis(e))
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisKvStore {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = self.full_key(key);
        self.execute(|mut conn| async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let key = self.full_key(key);
        let value = value.to_string();
        self.execute(|mut conn| async move { conn.set::<_, _, ()>(key, value).await })
            .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let key = self.full_key(key);
        self.execute(|mut conn| async move { conn.del::<_, ()>(key).await })
            .await
    }
}
