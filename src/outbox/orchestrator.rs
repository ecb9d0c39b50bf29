//! Immediate delivery with bounded retries.
//!
//! `submit` never drops a submission: it either reaches the endpoint or is
//! persisted to the backlog for a later flush. The same idempotency key is
//! presented on every attempt.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{timeout, Instant};

use crate::config::DeliveryConfig;
use crate::metrics::OutboxMetrics;
use crate::storage::StorageError;

use super::aggregator::MetricsAggregator;
use super::backoff::{BackoffConfig, LinearBackoff};
use super::connectivity::ConnectivitySensor;
use super::models::{IdempotencyKey, SubmitOutcome};
use super::store::DurableStore;
use super::transport::{DeliveryTransport, TransportError};

/// Retry policy for `submit`
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Deadline for each individual attempt
    pub attempt_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            attempt_timeout: Duration::from_millis(3000),
            backoff: BackoffConfig::default(),
        }
    }
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            attempt_timeout: config.attempt_timeout(),
            backoff: BackoffConfig::from(config),
        }
    }
}

/// One delivery attempt bounded by `deadline`. Returns the round-trip time.
pub(crate) async fn timed_delivery(
    transport: &dyn DeliveryTransport,
    deadline: Duration,
    payload: &Value,
    idempotency_key: &IdempotencyKey,
) -> Result<Duration, TransportError> {
    let started = Instant::now();
    match timeout(deadline, transport.deliver(payload, idempotency_key)).await {
        Ok(Ok(())) => Ok(started.elapsed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(TransportError::Timeout(deadline)),
    }
}

/// Delivers submissions immediately, deferring to the backlog on failure.
pub struct DeliveryOrchestrator {
    transport: Arc<dyn DeliveryTransport>,
    store: Arc<DurableStore>,
    metrics: Arc<MetricsAggregator>,
    sensor: Arc<ConnectivitySensor>,
    policy: DeliveryPolicy,
}

impl DeliveryOrchestrator {
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        store: Arc<DurableStore>,
        metrics: Arc<MetricsAggregator>,
        sensor: Arc<ConnectivitySensor>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            transport,
            store,
            metrics,
            sensor,
            policy,
        }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Deliver `payload` now or persist it for a later flush.
    ///
    /// Delivery failures never surface as errors; the only error is a
    /// failure to persist a deferred submission.
    #[tracing::instrument(
        name = "submit",
        skip_all,
        fields(idempotency_key = %idempotency_key)
    )]
    pub async fn submit(
        &self,
        payload: Value,
        idempotency_key: IdempotencyKey,
    ) -> Result<SubmitOutcome, StorageError> {
        if !self.sensor.is_online() {
            self.defer(payload, idempotency_key, "offline").await?;
            self.metrics.record_outcome(false, None).await;
            return Ok(SubmitOutcome::queued(0));
        }

        let total_attempts = self.policy.max_retries.saturating_add(1);
        let mut backoff = LinearBackoff::with_config(self.policy.backoff.clone());
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let result = timed_delivery(
                self.transport.as_ref(),
                self.policy.attempt_timeout,
                &payload,
                &idempotency_key,
            )
            .await;

            match result {
                Ok(latency) => {
                    OutboxMetrics::record_attempt("submit", true, Some(latency));
                    self.metrics.record_outcome(true, Some(latency)).await;
                    OutboxMetrics::record_sent();

                    tracing::info!(
                        attempt = attempts,
                        latency_ms = latency.as_millis() as u64,
                        "Submission delivered"
                    );
                    return Ok(SubmitOutcome::sent(attempts));
                }
                Err(e) => {
                    OutboxMetrics::record_attempt("submit", false, None);
                    self.metrics.record_outcome(false, None).await;

                    if !self.sensor.is_online() {
                        tracing::warn!(
                            attempt = attempts,
                            error = %e,
                            "Delivery failed and connectivity was lost"
                        );
                        self.defer(payload, idempotency_key, "connectivity lost").await?;
                        return Ok(SubmitOutcome::queued(attempts));
                    }

                    if attempts >= total_attempts {
                        tracing::warn!(
                            attempt = attempts,
                            error = %e,
                            "Delivery retries exhausted"
                        );
                        self.defer(payload, idempotency_key, "retries exhausted").await?;
                        return Ok(SubmitOutcome::queued(attempts));
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.kind(),
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn defer(
        &self,
        payload: Value,
        idempotency_key: IdempotencyKey,
        reason: &str,
    ) -> Result<(), StorageError> {
        match self.store.enqueue(payload, idempotency_key).await {
            Ok(item) => {
                OutboxMetrics::record_queued();
                tracing::info!(
                    idempotency_key = %item.idempotency_key,
                    reason = %reason,
                    "Submission queued for later delivery"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, reason = %reason, "Failed to persist submission");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::store::StoreConfig;
    use crate::storage::{KeyValueStore, MemoryKvStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays a script of results and records every call.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(), TransportError>>>,
        calls: Mutex<Vec<(Instant, String)>>,
        on_failure_go_offline: Option<Arc<ConnectivitySensor>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<(), TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                on_failure_go_offline: None,
            }
        }

        fn keys(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, k)| k.clone()).collect()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl DeliveryTransport for ScriptedTransport {
        async fn deliver(
            &self,
            _payload: &Value,
            idempotency_key: &IdempotencyKey,
        ) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), idempotency_key.to_string()));
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            if next.is_err() {
                if let Some(sensor) = &self.on_failure_go_offline {
                    sensor.set_online(false);
                }
            }
            next
        }
    }

    /// Transport that never answers.
    struct HangingTransport;

    #[async_trait]
    impl DeliveryTransport for HangingTransport {
        async fn deliver(&self, _: &Value, _: &IdempotencyKey) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    /// Backend that accepts reads but rejects writes.
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        fn backend_type(&self) -> &'static str {
            "read-only"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read-only".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    struct Harness {
        orchestrator: DeliveryOrchestrator,
        store: Arc<DurableStore>,
        metrics: Arc<MetricsAggregator>,
        sensor: Arc<ConnectivitySensor>,
    }

    fn harness_with(
        transport: Arc<dyn DeliveryTransport>,
        sensor: Arc<ConnectivitySensor>,
        backend: Arc<dyn KeyValueStore>,
    ) -> Harness {
        let store = Arc::new(DurableStore::new(backend, StoreConfig::default()));
        let metrics = Arc::new(MetricsAggregator::new(store.clone()));
        let orchestrator = DeliveryOrchestrator::new(
            transport,
            store.clone(),
            metrics.clone(),
            sensor.clone(),
            DeliveryPolicy::default(),
        );
        Harness {
            orchestrator,
            store,
            metrics,
            sensor,
        }
    }

    fn harness(transport: Arc<dyn DeliveryTransport>, online: bool) -> Harness {
        harness_with(
            transport,
            Arc::new(ConnectivitySensor::new(online)),
            Arc::new(MemoryKvStore::new()),
        )
    }

    fn payload() -> Value {
        json!({"name": "A", "email": "a@x.com", "subject": "hi", "message": "hello there"})
    }

    fn timeout_err() -> Result<(), TransportError> {
        Err(TransportError::Timeout(Duration::from_millis(3000)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_submit_queues_without_network() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let h = harness(transport.clone(), false);

        let outcome = h
            .orchestrator
            .submit(payload(), IdempotencyKey::new("k1").unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, SubmitOutcome::queued(0));
        assert!(transport.keys().is_empty());
        assert_eq!(h.store.backlog_len().await, 1);

        let snapshot = h.metrics.snapshot().await;
        assert_eq!(snapshot.error, 1);
        assert_eq!(snapshot.ok, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(())]));
        let h = harness(transport.clone(), true);

        let outcome = h
            .orchestrator
            .submit(payload(), IdempotencyKey::generate())
            .await
            .unwrap();

        assert_eq!(outcome, SubmitOutcome::sent(1));
        assert_eq!(transport.keys().len(), 1);
        assert_eq!(h.store.backlog_len().await, 0);
        assert_eq!(h.metrics.snapshot().await.ok, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt_after_timeout() {
        let h = harness(Arc::new(HangingTransport), true);
        // Swap in a transport that hangs once, then succeeds
        struct HangOnce {
            calls: Mutex<u32>,
        }
        #[async_trait]
        impl DeliveryTransport for HangOnce {
            async fn deliver(&self, _: &Value, _: &IdempotencyKey) -> Result<(), TransportError> {
                let first = {
                    let mut calls = self.calls.lock().unwrap();
                    *calls += 1;
                    *calls == 1
                };
                if first {
                    std::future::pending::<()>().await;
                }
                Ok(())
            }
        }
        let orchestrator = DeliveryOrchestrator::new(
            Arc::new(HangOnce {
                calls: Mutex::new(0),
            }),
            h.store.clone(),
            h.metrics.clone(),
            h.sensor.clone(),
            DeliveryPolicy::default(),
        );

        let started = tokio::time::Instant::now();
        let outcome = orchestrator
            .submit(payload(), IdempotencyKey::generate())
            .await
            .unwrap();

        assert_eq!(outcome, SubmitOutcome::sent(2));
        // 3000 ms attempt deadline + 500 ms backoff
        assert!(started.elapsed() >= Duration::from_millis(3500));

        let snapshot = h.metrics.snapshot().await;
        assert_eq!(snapshot.error, 1);
        assert_eq!(snapshot.ok, 1);
        assert_eq!(h.store.read_metrics().await.latencies.len(), 1);
        assert_eq!(h.store.backlog_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_enqueue_exactly_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            timeout_err(),
            Err(TransportError::Status { status: 503 }),
            Err(TransportError::Connect("refused".to_string())),
        ]));
        let h = harness(transport.clone(), true);
        let key = IdempotencyKey::new("stable-key").unwrap();

        let outcome = h.orchestrator.submit(payload(), key.clone()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::queued(3));

        let queue = h.store.read_queue().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].idempotency_key, key);
        assert_eq!(queue[0].payload, payload());

        // Same key on every attempt
        assert_eq!(transport.keys(), vec!["stable-key"; 3]);

        let snapshot = h.metrics.snapshot().await;
        assert_eq!(snapshot.error, 3);
        assert_eq!(snapshot.ok, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_between_attempts() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Status { status: 500 }),
            Err(TransportError::Status { status: 500 }),
            Err(TransportError::Status { status: 500 }),
        ]));
        let h = harness(transport.clone(), true);

        h.orchestrator
            .submit(payload(), IdempotencyKey::generate())
            .await
            .unwrap();

        let times = transport.call_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_millis(500));
        assert_eq!(times[2] - times[1], Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_lost_mid_flight_stops_retrying() {
        let sensor = Arc::new(ConnectivitySensor::new(true));
        let mut scripted = ScriptedTransport::new(vec![timeout_err(), Ok(())]);
        scripted.on_failure_go_offline = Some(sensor.clone());
        let transport = Arc::new(scripted);

        let h = harness_with(
            transport.clone(),
            sensor,
            Arc::new(MemoryKvStore::new()),
        );

        let outcome = h
            .orchestrator
            .submit(payload(), IdempotencyKey::generate())
            .await
            .unwrap();

        assert_eq!(outcome, SubmitOutcome::queued(1));
        assert_eq!(transport.keys().len(), 1);
        assert_eq!(h.store.backlog_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_failure_is_reported() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let h = harness_with(
            transport,
            Arc::new(ConnectivitySensor::new(false)),
            Arc::new(ReadOnlyStore),
        );

        let result = h
            .orchestrator
            .submit(payload(), IdempotencyKey::generate())
            .await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submissions_interleave() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            timeout_err(),
            timeout_err(),
        ]));
        let h = harness(transport.clone(), true);
        let orchestrator = Arc::new(h.orchestrator);

        let a = {
            let o = orchestrator.clone();
            let key = IdempotencyKey::new("a").unwrap();
            tokio::spawn(async move { o.submit(payload(), key).await })
        };
        let b = {
            let o = orchestrator.clone();
            let key = IdempotencyKey::new("b").unwrap();
            tokio::spawn(async move { o.submit(payload(), key).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        // Both failed once, backed off concurrently, then succeeded
        assert_eq!(a.status, crate::outbox::SubmitStatus::Sent);
        assert_eq!(b.status, crate::outbox::SubmitStatus::Sent);
        assert_eq!(transport.keys().len(), 4);
        assert_eq!(h.store.backlog_len().await, 0);
    }
}
