//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BACKLOG_DELIVERED_TOTAL, BACKLOG_ENQUEUED_TOTAL, BACKLOG_EVICTED_TOTAL, BACKLOG_SIZE,
    CONNECTIVITY_ONLINE, DELIVERY_ATTEMPTS_TOTAL, DELIVERY_LATENCY, ENDPOINT_REQUESTS_TOTAL,
    FLUSH_RUNS_TOTAL, SUBMISSIONS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording outbox metrics
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record one delivery attempt
    pub fn record_attempt(path: &str, ok: bool, latency: Option<Duration>) {
        let outcome = if ok { "ok" } else { "error" };
        DELIVERY_ATTEMPTS_TOTAL
            .with_label_values(&[path, outcome])
            .inc();
        if let Some(latency) = latency {
            DELIVERY_LATENCY.observe(latency.as_secs_f64());
        }
    }

    /// Record a submission that was delivered immediately
    pub fn record_sent() {
        SUBMISSIONS_TOTAL.with_label_values(&["sent"]).inc();
    }

    /// Record a submission that was deferred to the backlog
    pub fn record_queued() {
        SUBMISSIONS_TOTAL.with_label_values(&["queued"]).inc();
    }

    /// Record an item appended to the backlog
    pub fn record_enqueued(backlog: usize) {
        BACKLOG_ENQUEUED_TOTAL.inc();
        Self::set_backlog(backlog);
    }

    /// Record a backlog item delivered by a flush
    pub fn record_flushed(backlog: usize) {
        BACKLOG_DELIVERED_TOTAL.inc();
        Self::set_backlog(backlog);
    }

    /// Record items dropped by the backlog policy
    pub fn record_evicted(reason: &str, count: u64) {
        if count > 0 {
            BACKLOG_EVICTED_TOTAL.with_label_values(&[reason]).inc_by(count);
        }
    }

    /// Update the backlog gauge
    pub fn set_backlog(backlog: usize) {
        BACKLOG_SIZE.set(backlog as i64);
    }

    /// Record the result of a flush invocation
    pub fn record_flush(result: &str) {
        FLUSH_RUNS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Update the connectivity gauge
    pub fn set_online(online: bool) {
        CONNECTIVITY_ONLINE.set(if online { 1 } else { 0 });
    }
}

/// Helper struct for the mock endpoint
pub struct EndpointMetrics;

impl EndpointMetrics {
    pub fn record_accepted() {
        ENDPOINT_REQUESTS_TOTAL.with_label_values(&["accepted"]).inc();
    }

    pub fn record_replayed() {
        ENDPOINT_REQUESTS_TOTAL.with_label_values(&["replayed"]).inc();
    }

    pub fn record_failed() {
        ENDPOINT_REQUESTS_TOTAL.with_label_values(&["failed"]).inc();
    }

    pub fn record_rejected() {
        ENDPOINT_REQUESTS_TOTAL.with_label_values(&["rejected"]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_metrics_helpers() {
        OutboxMetrics::record_attempt("submit", true, Some(Duration::from_millis(120)));
        OutboxMetrics::record_attempt("flush", false, None);
        OutboxMetrics::record_enqueued(3);
        OutboxMetrics::record_flushed(2);
        OutboxMetrics::record_evicted("overflow", 0);
        OutboxMetrics::set_online(false);

        let before = BACKLOG_ENQUEUED_TOTAL.get();
        OutboxMetrics::record_enqueued(1);
        assert!(BACKLOG_ENQUEUED_TOTAL.get() > before);
    }
}
