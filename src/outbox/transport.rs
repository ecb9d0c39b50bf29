//! Outbound delivery to the receiving endpoint.
//!
//! A delivery is a single write-style call carrying the payload and the
//! idempotency key as a header. Every failure is treated as transient.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderName;
use reqwest::{Client, Url};
use serde_json::Value;
use thiserror::Error;

use crate::config::EndpointConfig;

use super::models::IdempotencyKey;

/// Errors returned by a single delivery attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response within the attempt deadline
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Endpoint unreachable
    #[error("connection failed: {0}")]
    Connect(String),

    /// Endpoint answered with a non-success status
    #[error("endpoint returned HTTP {status}")]
    Status { status: u16 },

    /// Any other request failure
    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("invalid header name: {0}")]
    InvalidHeader(String),
}

impl TransportError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Connect(_) => "connect",
            TransportError::Status { .. } => "status",
            TransportError::Request(_) => "request",
            TransportError::InvalidUrl(_) => "invalid_url",
            TransportError::InvalidHeader(_) => "invalid_header",
        }
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status: status.as_u16(),
            }
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Outbound delivery contract.
///
/// Implementations perform exactly one network call per invocation; retry
/// and timeout policy belong to the caller.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(
        &self,
        payload: &Value,
        idempotency_key: &IdempotencyKey,
    ) -> Result<(), TransportError>;
}

/// HTTP POST delivery using reqwest.
pub struct HttpTransport {
    client: Client,
    url: Url,
    idempotency_header: HeaderName,
    client_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &EndpointConfig) -> Result<Self, TransportError> {
        let url = Url::parse(&config.url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", config.url, e)))?;
        let idempotency_header = HeaderName::from_bytes(config.idempotency_header.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(config.idempotency_header.clone()))?;

        let client_timeout = Duration::from_millis(config.client_timeout_ms);
        let client = Client::builder()
            .timeout(client_timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url,
            idempotency_header,
            client_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(
        &self,
        payload: &Value,
        idempotency_key: &IdempotencyKey,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(self.idempotency_header.clone(), idempotency_key.as_str())
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.client_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        tracing::trace!(
            idempotency_key = %idempotency_key,
            status = status.as_u16(),
            "Endpoint accepted submission"
        );
        Ok(())
    }
}
