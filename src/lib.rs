// Shared components
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod telemetry;

// Delivery queue
pub mod outbox;

// Mock receiving endpoint
pub mod endpoint;

pub use error::{AppError, Result};
pub use outbox::{ContactOutbox, ContactPayload, IdempotencyKey, OutboxStats, SubmitOutcome};
