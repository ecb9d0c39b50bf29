//! Durable store for the backlog and the metrics accumulator.
//!
//! Both records live in a `KeyValueStore` under independent keys. Absent or
//! unparseable documents read as empty values. Every read-modify-write goes
//! through a per-record async lock held only for the storage round trip, so
//! concurrent submissions and a running flush cannot lose or duplicate items.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::StorageConfig;
use crate::metrics::OutboxMetrics;
use crate::storage::{KeyValueStore, StorageError};

use super::models::{IdempotencyKey, MetricsState, QueueItem};

/// Keys and backlog policy for a `DurableStore`
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub queue_key: String,
    pub metrics_key: String,
    /// Oldest items are evicted beyond this size, 0 = unbounded
    pub max_backlog_size: usize,
    /// Items older than this are dropped by `evict_expired`, 0 = never
    pub max_item_age_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            queue_key: "contact_queue_v1".to_string(),
            metrics_key: "contact_metrics_v1".to_string(),
            max_backlog_size: 0,
            max_item_age_seconds: 0,
        }
    }
}

impl From<&StorageConfig> for StoreConfig {
    fn from(settings: &StorageConfig) -> Self {
        Self {
            queue_key: settings.queue_key.clone(),
            metrics_key: settings.metrics_key.clone(),
            max_backlog_size: settings.max_backlog_size,
            max_item_age_seconds: settings.max_item_age_seconds,
        }
    }
}

/// Owner of the persisted backlog and metrics records.
pub struct DurableStore {
    backend: Arc<dyn KeyValueStore>,
    config: StoreConfig,
    queue_lock: Mutex<()>,
    metrics_lock: Mutex<()>,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            queue_lock: Mutex::new(()),
            metrics_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    // ------------------------------------------------------------------------
    // Backlog
    // ------------------------------------------------------------------------

    /// Current backlog. Absent, corrupt or unreadable storage reads as empty.
    pub async fn read_queue(&self) -> Vec<QueueItem> {
        match self.load_queue().await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read backlog, treating as empty");
                Vec::new()
            }
        }
    }

    /// Replace the stored backlog with `items`.
    pub async fn write_queue(&self, items: &[QueueItem]) -> Result<(), StorageError> {
        let _guard = self.queue_lock.lock().await;
        self.save_queue(items).await
    }

    /// Append a new item stamped with the current time.
    ///
    /// When a size cap is configured and reached, the oldest items are
    /// evicted to make room.
    pub async fn enqueue(
        &self,
        payload: Value,
        idempotency_key: IdempotencyKey,
    ) -> Result<QueueItem, StorageError> {
        let item = QueueItem::new(payload, idempotency_key);

        let _guard = self.queue_lock.lock().await;
        let mut queue = self.load_queue().await?;

        let mut evicted = 0u64;
        if self.config.max_backlog_size > 0 {
            while queue.len() >= self.config.max_backlog_size {
                let dropped = queue.remove(0);
                evicted += 1;
                tracing::warn!(
                    idempotency_key = %dropped.idempotency_key,
                    created_at = %dropped.created_at,
                    max_backlog_size = self.config.max_backlog_size,
                    "Evicted oldest backlog item, backlog is full"
                );
            }
        }

        queue.push(item.clone());
        self.save_queue(&queue).await?;

        OutboxMetrics::record_evicted("overflow", evicted);
        OutboxMetrics::record_enqueued(queue.len());

        tracing::debug!(
            idempotency_key = %item.idempotency_key,
            backlog = queue.len(),
            "Submission added to backlog"
        );

        Ok(item)
    }

    /// Remove and return the oldest item.
    pub async fn pop_front(&self) -> Result<Option<QueueItem>, StorageError> {
        let _guard = self.queue_lock.lock().await;
        let mut queue = self.load_queue().await?;
        if queue.is_empty() {
            return Ok(None);
        }

        let item = queue.remove(0);
        self.save_queue(&queue).await?;
        OutboxMetrics::set_backlog(queue.len());
        Ok(Some(item))
    }

    /// Return the oldest item without removing it.
    pub async fn peek_front(&self) -> Result<Option<QueueItem>, StorageError> {
        let _guard = self.queue_lock.lock().await;
        Ok(self.load_queue().await?.into_iter().next())
    }

    /// Remove `item` after its delivery succeeded.
    ///
    /// Returns `false` if the item is no longer in the backlog.
    pub async fn remove_delivered(&self, item: &QueueItem) -> Result<bool, StorageError> {
        let _guard = self.queue_lock.lock().await;
        let mut queue = self.load_queue().await?;

        let position = queue.iter().position(|queued| {
            queued.idempotency_key == item.idempotency_key && queued.created_at == item.created_at
        });

        match position {
            Some(index) => {
                queue.remove(index);
                self.save_queue(&queue).await?;
                OutboxMetrics::record_flushed(queue.len());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop items older than the configured maximum age.
    ///
    /// Returns the number of items removed; always 0 when no age limit is set.
    pub async fn evict_expired(&self) -> Result<usize, StorageError> {
        let max_age = self.config.max_item_age_seconds;
        if max_age == 0 {
            return Ok(0);
        }

        let _guard = self.queue_lock.lock().await;
        let mut queue = self.load_queue().await?;
        let before = queue.len();
        queue.retain(|item| {
            let expired = item.is_expired(max_age);
            if expired {
                tracing::warn!(
                    idempotency_key = %item.idempotency_key,
                    created_at = %item.created_at,
                    "Discarding expired backlog item"
                );
            }
            !expired
        });
        let removed = before - queue.len();

        if removed > 0 {
            self.save_queue(&queue).await?;
            OutboxMetrics::record_evicted("expired", removed as u64);
            OutboxMetrics::set_backlog(queue.len());
        }

        Ok(removed)
    }

    /// Number of items waiting in the backlog
    pub async fn backlog_len(&self) -> usize {
        self.read_queue().await.len()
    }

    async fn load_queue(&self) -> Result<Vec<QueueItem>, StorageError> {
        let raw = self.backend.get(&self.config.queue_key).await?;
        Ok(match raw {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    key = %self.config.queue_key,
                    error = %e,
                    "Stored backlog is corrupt, treating as empty"
                );
                Vec::new()
            }),
            None => Vec::new(),
        })
    }

    async fn save_queue(&self, items: &[QueueItem]) -> Result<(), StorageError> {
        // An absent record already reads as an empty backlog
        if items.is_empty() {
            return self.backend.remove(&self.config.queue_key).await;
        }
        let raw = serde_json::to_string(items)?;
        self.backend.set(&self.config.queue_key, &raw).await
    }

    // ------------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------------

    /// Current metrics. Absent, corrupt or unreadable storage reads as zero.
    pub async fn read_metrics(&self) -> MetricsState {
        match self.load_metrics().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read metrics, treating as empty");
                MetricsState::default()
            }
        }
    }

    /// Replace the stored metrics with `state`.
    pub async fn write_metrics(&self, state: &MetricsState) -> Result<(), StorageError> {
        let _guard = self.metrics_lock.lock().await;
        self.save_metrics(state).await
    }

    /// Apply `update` to the stored metrics under the metrics lock.
    pub async fn update_metrics<F>(&self, update: F) -> Result<MetricsState, StorageError>
    where
        F: FnOnce(&mut MetricsState),
    {
        let _guard = self.metrics_lock.lock().await;
        let mut state = self.load_metrics().await?;
        update(&mut state);
        self.save_metrics(&state).await?;
        Ok(state)
    }

    async fn load_metrics(&self) -> Result<MetricsState, StorageError> {
        let raw = self.backend.get(&self.config.metrics_key).await?;
        Ok(match raw {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    key = %self.config.metrics_key,
                    error = %e,
                    "Stored metrics are corrupt, treating as empty"
                );
                MetricsState::default()
            }),
            None => MetricsState::default(),
        })
    }

    async fn save_metrics(&self, state: &MetricsState) -> Result<(), StorageError> {
        let raw = serde_json::to_string(state)?;
        self.backend.set(&self.config.metrics_key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use serde_json::json;

    fn create_store(config: StoreConfig) -> (Arc<MemoryKvStore>, DurableStore) {
        let backend = Arc::new(MemoryKvStore::new());
        let store = DurableStore::new(backend.clone(), config);
        (backend, store)
    }

    fn key(k: &str) -> IdempotencyKey {
        IdempotencyKey::new(k).unwrap()
    }

    #[tokio::test]
    async fn test_read_queue_absent_is_empty() {
        let (_, store) = create_store(StoreConfig::default());
        assert!(store.read_queue().await.is_empty());
        assert_eq!(store.backlog_len().await, 0);
    }

    #[tokio::test]
    async fn test_read_queue_corrupt_is_empty() {
        let (backend, store) = create_store(StoreConfig::default());
        backend.set("contact_queue_v1", "{not json").await.unwrap();

        assert!(store.read_queue().await.is_empty());

        // Enqueue recovers by overwriting the corrupt document
        store.enqueue(json!({"n": 1}), key("k1")).await.unwrap();
        assert_eq!(store.backlog_len().await, 1);
    }

    #[tokio::test]
    async fn test_drained_backlog_removes_record() {
        let (backend, store) = create_store(StoreConfig::default());
        store.enqueue(json!({"n": 1}), key("k1")).await.unwrap();
        assert!(backend.get("contact_queue_v1").await.unwrap().is_some());

        store.pop_front().await.unwrap();

        assert!(backend.get("contact_queue_v1").await.unwrap().is_none());
        assert!(store.read_queue().await.is_empty());

        // Clearing an already absent backlog is fine too
        store.write_queue(&[]).await.unwrap();
        assert!(backend.get("contact_queue_v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_preserves_fifo_order() {
        let (_, store) = create_store(StoreConfig::default());

        for i in 0..3 {
            store
                .enqueue(json!({"n": i}), key(&format!("k{}", i)))
                .await
                .unwrap();
        }

        let keys: Vec<String> = store
            .read_queue()
            .await
            .into_iter()
            .map(|item| item.idempotency_key.to_string())
            .collect();
        assert_eq!(keys, vec!["k0", "k1", "k2"]);
    }

    #[tokio::test]
    async fn test_pop_front() {
        let (_, store) = create_store(StoreConfig::default());
        assert!(store.pop_front().await.unwrap().is_none());

        store.enqueue(json!({"n": 0}), key("k0")).await.unwrap();
        store.enqueue(json!({"n": 1}), key("k1")).await.unwrap();

        let first = store.pop_front().await.unwrap().unwrap();
        assert_eq!(first.idempotency_key.as_str(), "k0");
        assert_eq!(store.backlog_len().await, 1);
    }

    #[tokio::test]
    async fn test_peek_and_remove_delivered() {
        let (_, store) = create_store(StoreConfig::default());
        store.enqueue(json!({"n": 0}), key("k0")).await.unwrap();
        store.enqueue(json!({"n": 1}), key("k1")).await.unwrap();

        let head = store.peek_front().await.unwrap().unwrap();
        assert_eq!(head.idempotency_key.as_str(), "k0");
        assert_eq!(store.backlog_len().await, 2);

        assert!(store.remove_delivered(&head).await.unwrap());
        assert!(!store.remove_delivered(&head).await.unwrap());
        assert_eq!(store.backlog_len().await, 1);
    }

    #[tokio::test]
    async fn test_write_queue_replaces() {
        let (_, store) = create_store(StoreConfig::default());
        store.enqueue(json!({"n": 0}), key("k0")).await.unwrap();

        let replacement = vec![QueueItem::new(json!({"n": 9}), key("k9"))];
        store.write_queue(&replacement).await.unwrap();

        assert_eq!(store.read_queue().await, replacement);
    }

    #[tokio::test]
    async fn test_enqueue_evicts_oldest_when_full() {
        let (_, store) = create_store(StoreConfig {
            max_backlog_size: 2,
            ..Default::default()
        });

        for i in 0..4 {
            store
                .enqueue(json!({"n": i}), key(&format!("k{}", i)))
                .await
                .unwrap();
        }

        let queue = store.read_queue().await;
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].idempotency_key.as_str(), "k2");
        assert_eq!(queue[1].idempotency_key.as_str(), "k3");
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let (_, store) = create_store(StoreConfig::default());
        store.enqueue(json!({}), key("k0")).await.unwrap();
        // No age limit configured
        assert_eq!(store.evict_expired().await.unwrap(), 0);

        let mut stale = QueueItem::new(json!({}), key("old"));
        stale.created_at = chrono::Utc::now() - chrono::Duration::hours(2);
        let fresh = QueueItem::new(json!({}), key("new"));

        let (_, store) = create_store(StoreConfig {
            max_item_age_seconds: 3600,
            ..Default::default()
        });
        store.write_queue(&[stale, fresh]).await.unwrap();

        assert_eq!(store.evict_expired().await.unwrap(), 1);
        let queue = store.read_queue().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].idempotency_key.as_str(), "new");
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_loses_nothing() {
        let (_, store) = create_store(StoreConfig::default());
        let store = Arc::new(store);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .enqueue(json!({"n": i}), IdempotencyKey::generate())
                        .await
                        .unwrap();
                })
            })
            .collect();
        futures::future::join_all(handles).await;

        assert_eq!(store.backlog_len().await, 20);
    }

    #[tokio::test]
    async fn test_metrics_roundtrip_and_corruption() {
        let (backend, store) = create_store(StoreConfig::default());
        assert_eq!(store.read_metrics().await, MetricsState::default());

        backend.set("contact_metrics_v1", "garbage").await.unwrap();
        assert_eq!(store.read_metrics().await, MetricsState::default());

        let state = store
            .update_metrics(|m| {
                m.ok_count += 1;
                m.latencies.push_back(42.0);
            })
            .await
            .unwrap();
        assert_eq!(state.ok_count, 1);
        assert_eq!(store.read_metrics().await, state);
    }

    #[tokio::test]
    async fn test_records_are_independent() {
        let (_, store) = create_store(StoreConfig::default());
        store.enqueue(json!({}), key("k0")).await.unwrap();
        store.write_metrics(&MetricsState::default()).await.unwrap();

        assert_eq!(store.backlog_len().await, 1);
    }
}
