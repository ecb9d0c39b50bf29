use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::AppError;
use crate::metrics::{self, EndpointMetrics};
use crate::outbox::IdempotencyKey;

use super::EndpointState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/contact - accept a contact submission
pub async fn receive_contact(
    State(state): State<EndpointState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let idempotency_key = match headers.get(&state.idempotency_header) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| AppError::Validation("idempotency key is not ASCII".to_string()))?;
            Some(IdempotencyKey::new(raw).inspect_err(|_| EndpointMetrics::record_rejected())?)
        }
        None => None,
    };

    let fields = match body {
        Value::Object(fields) => fields,
        _ => {
            EndpointMetrics::record_rejected();
            return Err(AppError::Validation(
                "request body must be a JSON object".to_string(),
            ));
        }
    };

    if !state.latency.is_zero() {
        tokio::time::sleep(state.latency).await;
    }

    if let Some(key) = &idempotency_key {
        if let Some(previous) = state.accepted.get(key.as_str()) {
            EndpointMetrics::record_replayed();
            tracing::info!(idempotency_key = %key, "Duplicate submission, replaying response");
            return Ok((StatusCode::ACCEPTED, Json(previous.value().clone())).into_response());
        }
    }

    if state.failure_rate > 0.0 && rand::rng().random_bool(state.failure_rate) {
        EndpointMetrics::record_failed();
        tracing::debug!("Simulating transient failure");
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Temporary failure" })),
        )
            .into_response());
    }

    let response = accepted_body(fields);

    let response = match &idempotency_key {
        // A concurrent request with the same key may have won the race
        Some(key) => state
            .accepted
            .entry(key.as_str().to_string())
            .or_insert(response)
            .value()
            .clone(),
        None => response,
    };

    EndpointMetrics::record_accepted();
    tracing::info!(
        id = %response.get("id").and_then(|id| id.as_str()).unwrap_or_default(),
        idempotency_key = ?idempotency_key.as_ref().map(IdempotencyKey::as_str),
        "Contact submission accepted"
    );

    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

fn accepted_body(fields: Map<String, Value>) -> Value {
    let mut response = Map::new();
    response.insert("status".to_string(), json!("queued"));
    response.insert("id".to_string(), json!(uuid::Uuid::new_v4().to_string()));
    // Submitted fields are echoed back and take precedence
    response.extend(fields);
    Value::Object(response)
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
