//! Wiring for the outbox components.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{ConnectivityConfig, Settings};
use crate::error::Result;
use crate::storage::{create_kv_store, KeyValueStore};

use super::aggregator::MetricsAggregator;
use super::connectivity::{ConnectivityMonitor, ConnectivitySensor, TcpProbe};
use super::flusher::{BacklogFlusher, FlushReport};
use super::models::{IdempotencyKey, SubmitOutcome};
use super::orchestrator::{DeliveryOrchestrator, DeliveryPolicy};
use super::reconnect::ReconnectFlushTask;
use super::store::{DurableStore, StoreConfig};
use super::transport::{DeliveryTransport, HttpTransport};

/// Counts, mean latency and backlog length
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxStats {
    pub ok: u64,
    pub error: u64,
    pub avg_latency_ms: f64,
    pub backlog: usize,
}

/// Handles of the background tasks started by `spawn_background`
pub struct BackgroundTasks {
    pub startup_flush: Option<JoinHandle<FlushReport>>,
    pub reconnect: JoinHandle<()>,
    pub monitor: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Wait for every task to finish. Call after sending shutdown.
    pub async fn join(self) {
        if let Some(handle) = self.startup_flush {
            let _ = handle.await;
        }
        let _ = self.reconnect.await;
        if let Some(handle) = self.monitor {
            let _ = handle.await;
        }
    }
}

/// At-least-once delivery queue for contact submissions.
pub struct ContactOutbox {
    store: Arc<DurableStore>,
    metrics: Arc<MetricsAggregator>,
    sensor: Arc<ConnectivitySensor>,
    orchestrator: DeliveryOrchestrator,
    flusher: Arc<BacklogFlusher>,
    probe_target: Option<String>,
    connectivity: ConnectivityConfig,
}

impl ContactOutbox {
    /// Build the outbox from configuration, using the HTTP transport.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let backend = create_kv_store(&settings.storage)?;
        let transport = HttpTransport::new(&settings.endpoint)?;
        let probe_target = probe_target(transport.url());

        let sensor = Arc::new(ConnectivitySensor::new(
            settings.connectivity.initially_online,
        ));

        let mut outbox = Self::new(
            backend,
            Arc::new(transport),
            sensor,
            StoreConfig::from(&settings.storage),
            settings.storage.latency_window,
            DeliveryPolicy::from(&settings.delivery),
        );
        outbox.probe_target = probe_target;
        outbox.connectivity = settings.connectivity.clone();

        tracing::info!(
            endpoint = %settings.endpoint.url,
            backend = outbox.store.backend_type(),
            max_retries = settings.delivery.max_retries,
            attempt_timeout_ms = settings.delivery.attempt_timeout_ms,
            "Contact outbox initialized"
        );

        Ok(outbox)
    }

    /// Build the outbox from explicit components.
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        transport: Arc<dyn DeliveryTransport>,
        sensor: Arc<ConnectivitySensor>,
        store_config: StoreConfig,
        latency_window: usize,
        policy: DeliveryPolicy,
    ) -> Self {
        let store = Arc::new(DurableStore::new(backend, store_config));
        let metrics = Arc::new(MetricsAggregator::with_latency_window(
            store.clone(),
            latency_window,
        ));
        let flusher = Arc::new(BacklogFlusher::new(
            transport.clone(),
            store.clone(),
            metrics.clone(),
            policy.attempt_timeout,
        ));
        let orchestrator = DeliveryOrchestrator::new(
            transport,
            store.clone(),
            metrics.clone(),
            sensor.clone(),
            policy,
        );

        Self {
            store,
            metrics,
            sensor,
            orchestrator,
            flusher,
            probe_target: None,
            connectivity: ConnectivityConfig::default(),
        }
    }

    /// Deliver a submission now or queue it for later.
    pub async fn submit(
        &self,
        payload: impl Into<Value>,
        idempotency_key: IdempotencyKey,
    ) -> Result<SubmitOutcome> {
        let outcome = self
            .orchestrator
            .submit(payload.into(), idempotency_key)
            .await?;
        Ok(outcome)
    }

    /// Submit with a freshly generated idempotency key.
    pub async fn submit_new(&self, payload: impl Into<Value>) -> Result<SubmitOutcome> {
        self.submit(payload, IdempotencyKey::generate()).await
    }

    pub async fn flush(&self) -> FlushReport {
        self.flusher.flush().await
    }

    pub async fn stats(&self) -> OutboxStats {
        let snapshot = self.metrics.snapshot().await;
        OutboxStats {
            ok: snapshot.ok,
            error: snapshot.error,
            avg_latency_ms: snapshot.avg_latency,
            backlog: self.store.backlog_len().await,
        }
    }

    pub fn sensor(&self) -> &Arc<ConnectivitySensor> {
        &self.sensor
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn flusher(&self) -> &Arc<BacklogFlusher> {
        &self.flusher
    }

    /// Start the startup flush, the reconnect task and, when enabled, the
    /// reachability monitor. All tasks stop on `shutdown`.
    pub fn spawn_background(&self, shutdown: &broadcast::Sender<()>) -> BackgroundTasks {
        // Subscribe before the startup flush so a reconnect during it is seen
        let reconnect_task =
            ReconnectFlushTask::new(&self.sensor, self.flusher.clone(), shutdown.subscribe());

        let startup_flush = if self.sensor.is_online() {
            let flusher = self.flusher.clone();
            Some(tokio::spawn(async move { flusher.flush().await }))
        } else {
            None
        };

        let reconnect = tokio::spawn(reconnect_task.run());

        let monitor = match (&self.probe_target, self.connectivity.probe_enabled) {
            (Some(target), true) => {
                let probe = Arc::new(TcpProbe::new(
                    target.clone(),
                    self.connectivity.probe_timeout(),
                ));
                let monitor = ConnectivityMonitor::new(
                    self.sensor.clone(),
                    probe,
                    self.connectivity.probe_interval(),
                    shutdown.subscribe(),
                );
                Some(tokio::spawn(monitor.run()))
            }
            (None, true) => {
                tracing::warn!("Reachability probing enabled but endpoint has no host");
                None
            }
            _ => None,
        };

        BackgroundTasks {
            startup_flush,
            reconnect,
            monitor,
        }
    }
}

fn probe_target(url: &reqwest::Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    // IPv6 hosts come back already bracketed
    Some(format!("{}:{}", host, port))
}
