//! At-least-once delivery queue for contact-form submissions.
//!
//! # Architecture
//!
//! ```text
//! submit ──▶ DeliveryOrchestrator ──▶ DeliveryTransport ──▶ endpoint
//!                 │  (3 attempts,            ▲
//!                 │   linear backoff)        │
//!                 ▼                          │
//!            DurableStore ◀──── BacklogFlusher ◀── ReconnectFlushTask
//!                 ▲                                      ▲
//!        MetricsAggregator                      ConnectivitySensor
//! ```
//!
//! `ContactOutbox` wires the components together.

pub mod aggregator;
pub mod backoff;
pub mod client;
pub mod connectivity;
pub mod flusher;
pub mod models;
pub mod orchestrator;
pub mod reconnect;
pub mod store;
pub mod transport;

pub use aggregator::MetricsAggregator;
pub use backoff::{BackoffConfig, LinearBackoff};
pub use client::{BackgroundTasks, ContactOutbox, OutboxStats};
pub use connectivity::{
    ConnectivityMonitor, ConnectivitySensor, ConnectivityState, ReachabilityProbe, TcpProbe,
};
pub use flusher::{BacklogFlusher, FlushReport, FlushStatsSnapshot};
pub use models::{
    ContactPayload, IdempotencyKey, KeyError, MetricsSnapshot, MetricsState, QueueItem,
    SubmitOutcome, SubmitStatus,
};
pub use orchestrator::{DeliveryOrchestrator, DeliveryPolicy};
pub use reconnect::ReconnectFlushTask;
pub use store::{DurableStore, StoreConfig};
pub use transport::{DeliveryTransport, HttpTransport, TransportError};
