//! Data types shared by the outbox components.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when constructing an idempotency key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("idempotency key cannot be empty")]
    Empty,

    #[error("idempotency key exceeds {max} characters")]
    TooLong { max: usize },

    #[error("idempotency key must be visible ASCII without spaces")]
    InvalidCharacters,
}

/// Caller-generated token identifying one logical submission.
///
/// The same key is presented on every attempt and every later flush of that
/// submission so the receiving endpoint can deduplicate.
///
/// Any visible ASCII token is accepted so it can travel in an HTTP header.
/// Deserialized keys go through the same validation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    const MAX_LENGTH: usize = 128;

    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into().trim().to_string();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Fresh random key for a new logical submission
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), KeyError> {
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        if key.len() > Self::MAX_LENGTH {
            return Err(KeyError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if !key.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(KeyError::InvalidCharacters);
        }
        Ok(())
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = KeyError;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contact form submission as produced by the UI layer.
///
/// Field validation is owned by the caller; the outbox stores and forwards
/// whatever JSON it is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPayload {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
}

impl ContactPayload {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            subject: subject.into(),
            message: message.into(),
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: impl Into<String>) -> Self {
        self.budget = Some(budget.into());
        self
    }

    /// Opaque representation handed to the outbox
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "name": self.name,
            "email": self.email,
            "subject": self.subject,
            "message": self.message,
        });
        if let (Some(budget), Some(map)) = (&self.budget, value.as_object_mut()) {
            map.insert("budget".to_string(), Value::String(budget.clone()));
        }
        value
    }
}

impl From<ContactPayload> for Value {
    fn from(payload: ContactPayload) -> Self {
        payload.to_value()
    }
}

/// One durably stored pending submission.
///
/// Never mutated after creation: an item is either removed after a
/// successful delivery or left in place with identical contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub payload: Value,
    pub idempotency_key: IdempotencyKey,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(payload: Value, idempotency_key: IdempotencyKey) -> Self {
        Self {
            payload,
            idempotency_key,
            // Stored with millisecond precision
            created_at: Utc::now().trunc_subsecs(3),
        }
    }

    /// Check if the item is older than `max_age_seconds`
    pub fn is_expired(&self, max_age_seconds: u64) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.num_seconds() >= max_age_seconds as i64
    }
}

/// Running delivery metrics accumulator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsState {
    #[serde(rename = "ok", default)]
    pub ok_count: u64,
    #[serde(rename = "error", default)]
    pub error_count: u64,
    /// Round-trip durations of successful attempts, in milliseconds
    #[serde(default)]
    pub latencies: VecDeque<f64>,
}

impl MetricsState {
    /// Mean of the recorded latencies, `0.0` when none were recorded
    pub fn avg_latency(&self) -> f64 {
        if self.latencies.is_empty() {
            0.0
        } else {
            self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ok: self.ok_count,
            error: self.error_count,
            avg_latency: self.avg_latency(),
        }
    }
}

/// Read-only view of the metrics accumulator
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub ok: u64,
    pub error: u64,
    pub avg_latency: f64,
}

/// Final status of a submission as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    /// Delivered to the endpoint
    Sent,
    /// Persisted to the backlog for a later flush
    Queued,
}

impl SubmitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitStatus::Sent => "sent",
            SubmitStatus::Queued => "queued",
        }
    }
}

/// Result of `submit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub status: SubmitStatus,
    /// Network attempts made (0 when queued while offline)
    pub attempts: u32,
}

impl SubmitOutcome {
    pub fn sent(attempts: u32) -> Self {
        Self {
            status: SubmitStatus::Sent,
            attempts,
        }
    }

    pub fn queued(attempts: u32) -> Self {
        Self {
            status: SubmitStatus::Queued,
            attempts,
        }
    }
}
