//! Durable delivery metrics.
//!
//! Every attempt outcome is written through to the store immediately. The
//! submission volume of a contact form is low enough that batching is not
//! worth the risk of losing counts on restart.

use std::sync::Arc;
use std::time::Duration;

use super::models::{MetricsSnapshot, MetricsState};
use super::store::DurableStore;

/// Records attempt outcomes and latencies into the durable store.
pub struct MetricsAggregator {
    store: Arc<DurableStore>,
    /// Latency samples kept, 0 = unbounded
    latency_window: usize,
}

impl MetricsAggregator {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self::with_latency_window(store, 0)
    }

    /// Keep only the most recent `latency_window` samples (0 keeps all).
    pub fn with_latency_window(store: Arc<DurableStore>, latency_window: usize) -> Self {
        Self {
            store,
            latency_window,
        }
    }

    /// Record one attempt outcome.
    ///
    /// A latency is only kept for successful attempts. Persistence failures
    /// are logged and swallowed; metrics never affect delivery.
    pub async fn record_outcome(&self, ok: bool, latency: Option<Duration>) {
        let window = self.latency_window;
        let result = self
            .store
            .update_metrics(|state| apply_outcome(state, ok, latency, window))
            .await;

        if let Err(e) = result {
            tracing::warn!(ok = ok, error = %e, "Failed to persist delivery metrics");
        }
    }

    /// Counts and mean latency, read from the store
    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.store.read_metrics().await.snapshot()
    }
}

fn apply_outcome(state: &mut MetricsState, ok: bool, latency: Option<Duration>, window: usize) {
    if ok {
        state.ok_count = state.ok_count.saturating_add(1);
        if let Some(latency) = latency {
            state.latencies.push_back(latency.as_secs_f64() * 1000.0);
            if window > 0 {
                while state.latencies.len() > window {
                    state.latencies.pop_front();
                }
            }
        }
    } else {
        state.error_count = state.error_count.saturating_add(1);
    }
}
