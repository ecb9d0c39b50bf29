//! Backlog flushing.
//!
//! Items are delivered one at a time in FIFO order with a single attempt
//! each. The first failure halts the pass and leaves that item at the front
//! of the queue. An item is removed only after the endpoint accepted it, so
//! a crash mid-flush can cause a duplicate delivery but never a loss; the
//! idempotency key lets the endpoint deduplicate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::metrics::OutboxMetrics;

use super::aggregator::MetricsAggregator;
use super::orchestrator::timed_delivery;
use super::store::DurableStore;
use super::transport::DeliveryTransport;

/// Result of one `flush` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Items delivered and removed
    pub delivered: usize,
    /// Items discarded for exceeding the maximum age
    pub expired: usize,
    /// The pass stopped at a failed item
    pub halted: bool,
    /// Another flush was running; this call was folded into it
    pub coalesced: bool,
    /// Backlog length when the call returned
    pub remaining: usize,
}

/// Flush counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushStatsSnapshot {
    pub invocations: u64,
    pub passes: u64,
    pub coalesced: u64,
}

#[derive(Default)]
struct FlushStats {
    invocations: AtomicU64,
    passes: AtomicU64,
    coalesced: AtomicU64,
}

#[derive(Default)]
struct FlushState {
    running: bool,
    pending: bool,
}

/// Clears the running flag even if the flushing future is dropped.
///
/// A coalesced request still pending at that point is handed to
/// `rerun_requested` waiters instead of being discarded.
struct RunningGuard<'a> {
    state: &'a Mutex<FlushState>,
    rerun: &'a Notify,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.running = false;
            std::mem::take(&mut state.pending)
        };
        if pending {
            tracing::debug!("Flush ended with a pending request, handing it off");
            self.rerun.notify_one();
        }
    }
}

/// Drains the backlog. At most one pass runs at a time.
pub struct BacklogFlusher {
    transport: Arc<dyn DeliveryTransport>,
    store: Arc<DurableStore>,
    metrics: Arc<MetricsAggregator>,
    attempt_timeout: Duration,
    state: Mutex<FlushState>,
    rerun: Notify,
    stats: FlushStats,
}

impl BacklogFlusher {
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        store: Arc<DurableStore>,
        metrics: Arc<MetricsAggregator>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            metrics,
            attempt_timeout,
            state: Mutex::new(FlushState::default()),
            rerun: Notify::new(),
            stats: FlushStats::default(),
        }
    }

    /// Deliver backlog items in order until the queue is empty or one fails.
    ///
    /// A call made while a pass is running returns immediately and schedules
    /// one more pass after the current one, even if the current one halts.
    /// If the running flush is cancelled first, the request is handed to
    /// [`rerun_requested`](Self::rerun_requested).
    pub async fn flush(&self) -> FlushReport {
        self.stats.invocations.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.running {
                state.pending = true;
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                OutboxMetrics::record_flush("coalesced");
                tracing::debug!("Flush already running, coalescing");
                return FlushReport {
                    coalesced: true,
                    ..Default::default()
                };
            }
            state.running = true;
            state.pending = false;
        }

        let _guard = RunningGuard {
            state: &self.state,
            rerun: &self.rerun,
        };
        let mut report = FlushReport::default();

        loop {
            self.stats.passes.fetch_add(1, Ordering::Relaxed);
            // `halted` describes the last pass only
            report.halted = false;
            self.run_pass(&mut report).await;

            let rerun = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut state.pending)
            };
            if !rerun {
                break;
            }
        }

        report.remaining = self.store.backlog_len().await;
        OutboxMetrics::set_backlog(report.remaining);
        OutboxMetrics::record_flush(if report.halted { "halted" } else { "drained" });

        if report.delivered > 0 || report.halted || report.expired > 0 {
            tracing::info!(
                delivered = report.delivered,
                expired = report.expired,
                halted = report.halted,
                remaining = report.remaining,
                "Backlog flush finished"
            );
        }

        report
    }

    async fn run_pass(&self, report: &mut FlushReport) {
        match self.store.evict_expired().await {
            Ok(n) => report.expired += n,
            Err(e) => tracing::warn!(error = %e, "Failed to discard expired backlog items"),
        }

        loop {
            let item = match self.store.peek_front().await {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read backlog, stopping flush");
                    report.halted = true;
                    return;
                }
            };

            let result = timed_delivery(
                self.transport.as_ref(),
                self.attempt_timeout,
                &item.payload,
                &item.idempotency_key,
            )
            .await;

            match result {
                Ok(latency) => {
                    OutboxMetrics::record_attempt("flush", true, Some(latency));
                    self.metrics.record_outcome(true, Some(latency)).await;

                    match self.store.remove_delivered(&item).await {
                        Ok(_) => {
                            report.delivered += 1;
                            tracing::debug!(
                                idempotency_key = %item.idempotency_key,
                                latency_ms = latency.as_millis() as u64,
                                "Backlog item delivered"
                            );
                        }
                        Err(e) => {
                            // Left in place; the next flush redelivers it under the same key
                            tracing::error!(
                                idempotency_key = %item.idempotency_key,
                                error = %e,
                                "Delivered backlog item could not be removed"
                            );
                            report.halted = true;
                            return;
                        }
                    }
                }
                Err(e) => {
                    OutboxMetrics::record_attempt("flush", false, None);
                    self.metrics.record_outcome(false, None).await;
                    tracing::warn!(
                        idempotency_key = %item.idempotency_key,
                        error_kind = e.kind(),
                        error = %e,
                        "Backlog delivery failed, stopping flush"
                    );
                    report.halted = true;
                    return;
                }
            }
        }
    }

    /// Resolves when a coalesced request was left over by a flush that ended
    /// before serving it. The caller is expected to run `flush` again.
    pub fn rerun_requested(&self) -> Notified<'_> {
        self.rerun.notified()
    }

    /// Whether a pass is currently running
    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    pub fn stats(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            invocations: self.stats.invocations.load(Ordering::Relaxed),
            passes: self.stats.passes.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
        }
    }
}
