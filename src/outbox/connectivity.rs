//! Connectivity sensing.
//!
//! `ConnectivitySensor` holds the current online/offline state and
//! publishes it on a `watch` channel. The state carries a count of
//! offline-to-online transitions so subscribers that only observe the
//! latest value still see every reconnect, even when the link flaps faster
//! than they wake up.
//!
//! Hosts with a platform signal call `set_online` directly. Otherwise
//! `ConnectivityMonitor` polls a `ReachabilityProbe` and drives the sensor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

use crate::metrics::OutboxMetrics;

/// Snapshot of the connectivity signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub online: bool,
    /// Number of offline-to-online transitions observed so far
    pub reconnects: u64,
}

/// Online/offline state shared by the orchestrator and the reconnect task.
pub struct ConnectivitySensor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivitySensor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(ConnectivityState {
            online: initially_online,
            reconnects: 0,
        });
        OutboxMetrics::set_online(initially_online);
        Self { tx }
    }

    /// Current state, consulted synchronously before each delivery decision
    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    /// Update the state. Returns `true` if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|state| {
            if state.online == online {
                return false;
            }
            state.online = online;
            if online {
                state.reconnects += 1;
            }
            true
        });

        if changed {
            OutboxMetrics::set_online(online);
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::warn!("Connectivity lost");
            }
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivitySensor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Source of reachability readings for `ConnectivityMonitor`.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probe that succeeds when a TCP connection to `addr` can be opened.
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self) -> bool {
        match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(addr = %self.addr, error = %e, "Reachability probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %self.addr, "Reachability probe timed out");
                false
            }
        }
    }
}

/// Background task that polls a probe and updates the sensor.
pub struct ConnectivityMonitor {
    sensor: Arc<ConnectivitySensor>,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl ConnectivityMonitor {
    pub fn new(
        sensor: Arc<ConnectivitySensor>,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            sensor,
            probe,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Connectivity monitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Connectivity monitor received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    let online = self.probe.probe().await;
                    self.sensor.set_online(online);
                }
            }
        }

        tracing::info!("Connectivity monitor stopped");
    }
}
