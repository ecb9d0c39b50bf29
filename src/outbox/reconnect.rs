//! Flush-on-reconnect background task.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::connectivity::{ConnectivitySensor, ConnectivityState};
use super::flusher::BacklogFlusher;

/// Runs one backlog flush for every offline-to-online transition.
///
/// Also picks up coalesced flush requests that a cancelled flush left
/// behind, so they are served even when no pass is running anymore.
pub struct ReconnectFlushTask {
    flusher: Arc<BacklogFlusher>,
    rx: watch::Receiver<ConnectivityState>,
    last_reconnects: u64,
    shutdown: broadcast::Receiver<()>,
}

impl ReconnectFlushTask {
    /// Subscribes immediately so transitions after construction are not missed.
    pub fn new(
        sensor: &ConnectivitySensor,
        flusher: Arc<BacklogFlusher>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let mut rx = sensor.subscribe();
        let last_reconnects = rx.borrow_and_update().reconnects;
        Self {
            flusher,
            rx,
            last_reconnects,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("Reconnect flush task started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Reconnect flush task received shutdown signal");
                    break;
                }
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Connectivity sensor dropped");
                        break;
                    }

                    let state = *self.rx.borrow_and_update();
                    if state.online && state.reconnects > self.last_reconnects {
                        self.last_reconnects = state.reconnects;
                        tracing::info!(
                            reconnects = state.reconnects,
                            "Back online, flushing backlog"
                        );
                        self.flusher.flush().await;
                    }
                }
                _ = self.flusher.rerun_requested() => {
                    if self.rx.borrow().online {
                        tracing::info!("Serving flush request left by an interrupted flush");
                        self.flusher.flush().await;
                    } else {
                        tracing::debug!("Offline, leaving backlog for the next reconnect");
                    }
                }
            }
        }

        tracing::info!("Reconnect flush task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::aggregator::MetricsAggregator;
    use crate::outbox::models::IdempotencyKey;
    use crate::outbox::store::{DurableStore, StoreConfig};
    use crate::outbox::transport::{DeliveryTransport, TransportError};
    use crate::storage::MemoryKvStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryTransport for CountingTransport {
        async fn deliver(&self, _: &Value, _: &IdempotencyKey) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// First call blocks until released and then fails; later calls succeed.
    struct StallThenFailTransport {
        gate: Notify,
        entered: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryTransport for StallThenFailTransport {
        async fn deliver(&self, _: &Value, _: &IdempotencyKey) -> Result<(), TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.gate.notified().await;
                return Err(TransportError::Connect("network down".to_string()));
            }
            Ok(())
        }
    }

    struct Fixture {
        sensor: Arc<ConnectivitySensor>,
        flusher: Arc<BacklogFlusher>,
        store: Arc<DurableStore>,
    }

    fn fixture(transport: Arc<dyn DeliveryTransport>, online: bool) -> Fixture {
        let sensor = Arc::new(ConnectivitySensor::new(online));
        let store = Arc::new(DurableStore::new(
            Arc::new(MemoryKvStore::new()),
            StoreConfig::default(),
        ));
        let metrics = Arc::new(MetricsAggregator::new(store.clone()));
        let flusher = Arc::new(BacklogFlusher::new(
            transport,
            store.clone(),
            metrics,
            Duration::from_millis(3000),
        ));
        Fixture {
            sensor,
            flusher,
            store,
        }
    }

    fn counting() -> Arc<CountingTransport> {
        Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        })
    }

    async fn seed(store: &DurableStore, key: &str) {
        store
            .enqueue(json!({ "id": key }), IdempotencyKey::new(key).unwrap())
            .await
            .unwrap();
    }

    async fn wait_for_invocations(flusher: &BacklogFlusher, expected: u64) {
        for _ in 0..200 {
            if flusher.stats().invocations >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_empty_backlog(store: &DurableStore) {
        for _ in 0..200 {
            if store.backlog_len().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_reconnect_triggers_single_flush() {
        let transport = counting();
        let f = fixture(transport.clone(), false);
        seed(&f.store, "item1").await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = ReconnectFlushTask::new(&f.sensor, f.flusher.clone(), shutdown_rx);
        let handle = tokio::spawn(task.run());

        f.sensor.set_online(true);
        wait_for_invocations(&f.flusher, 1).await;
        // Give a spurious second flush a chance to show up
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.flusher.stats().invocations, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.backlog_len().await, 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_going_offline_does_not_flush() {
        let f = fixture(counting(), true);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = ReconnectFlushTask::new(&f.sensor, f.flusher.clone(), shutdown_rx);
        let handle = tokio::spawn(task.run());

        f.sensor.set_online(false);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.flusher.stats().invocations, 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_each_reconnect_flushes() {
        let f = fixture(counting(), false);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = ReconnectFlushTask::new(&f.sensor, f.flusher.clone(), shutdown_rx);
        let handle = tokio::spawn(task.run());

        f.sensor.set_online(true);
        wait_for_invocations(&f.flusher, 1).await;
        f.sensor.set_online(false);
        f.sensor.set_online(true);
        wait_for_invocations(&f.flusher, 2).await;

        assert_eq!(f.flusher.stats().invocations, 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_during_failing_startup_flush_drains_backlog() {
        let transport = Arc::new(StallThenFailTransport {
            gate: Notify::new(),
            entered: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let f = fixture(transport.clone(), true);
        seed(&f.store, "item1").await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = ReconnectFlushTask::new(&f.sensor, f.flusher.clone(), shutdown_rx);
        let handle = tokio::spawn(task.run());

        // Startup flush with its only attempt in flight
        let startup = {
            let flusher = f.flusher.clone();
            tokio::spawn(async move { flusher.flush().await })
        };
        transport.entered.notified().await;

        f.sensor.set_online(false);
        f.sensor.set_online(true);
        // The reconnect flush is folded into the running one
        wait_for_invocations(&f.flusher, 2).await;
        assert_eq!(f.flusher.stats().coalesced, 1);

        transport.gate.notify_one();
        let report = startup.await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(f.store.backlog_len().await, 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupted_flush_request_is_served() {
        let transport = Arc::new(StallThenFailTransport {
            gate: Notify::new(),
            entered: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let f = fixture(transport.clone(), true);
        seed(&f.store, "item1").await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = ReconnectFlushTask::new(&f.sensor, f.flusher.clone(), shutdown_rx);
        let handle = tokio::spawn(task.run());

        let interrupted = {
            let flusher = f.flusher.clone();
            tokio::spawn(async move { flusher.flush().await })
        };
        transport.entered.notified().await;
        assert!(f.flusher.flush().await.coalesced);

        interrupted.abort();
        let _ = interrupted.await;

        wait_for_empty_backlog(&f.store).await;
        assert_eq!(f.store.backlog_len().await, 0);
        assert_eq!(f.flusher.stats().passes, 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
