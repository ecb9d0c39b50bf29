//! Mock receiving endpoint.
//!
//! Stands in for the real contact API during development and in tests:
//! it accepts submissions after a simulated latency, fails a configurable
//! share of them with HTTP 503, and replays the first response for a
//! repeated idempotency key.

mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::AppError;

pub use handlers::{health, prometheus_metrics, receive_contact, HealthResponse};

/// Shared state of the mock endpoint
#[derive(Clone)]
pub struct EndpointState {
    pub latency: Duration,
    /// Probability in `[0, 1]` of answering 503
    pub failure_rate: f64,
    pub idempotency_header: HeaderName,
    /// First response per idempotency key
    pub accepted: Arc<DashMap<String, Value>>,
}

impl EndpointState {
    pub fn new(
        latency: Duration,
        failure_rate: f64,
        idempotency_header: &str,
    ) -> Result<Self, AppError> {
        let idempotency_header = HeaderName::from_bytes(idempotency_header.as_bytes())
            .map_err(|_| {
                AppError::Validation(format!("invalid header name: {}", idempotency_header))
            })?;

        Ok(Self {
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            idempotency_header,
            accepted: Arc::new(DashMap::new()),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        Self::new(
            Duration::from_millis(settings.mock.latency_ms),
            settings.mock.failure_rate,
            &settings.endpoint.idempotency_header,
        )
    }

    /// Number of distinct idempotency keys accepted so far
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }
}

pub fn create_app(state: EndpointState) -> Router {
    Router::new()
        .route("/api/contact", post(receive_contact))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
