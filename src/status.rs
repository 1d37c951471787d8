//! C6: the status bus (§4.6). Publishes `ProxyStatus` and node-list
//! snapshots to zero or more observers using lossy, coalescing channels;
//! `tokio::sync::watch` is an exact fit for "may drop intermediate
//! snapshots, must eventually see latest, must never block the producer".

use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;

use crate::node::Node;

/// Immutable snapshot of proxy state, published on every state change
/// (§3, §4.5).
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    pub running: bool,
    pub listen_port: u16,
    pub uptime_seconds: u64,
    pub active_connections: u32,
    pub current_node: Option<Node>,
    pub current_latency_ms: Option<f64>,
}

impl ProxyStatus {
    pub fn stopped(listen_port: u16) -> Self {
        Self {
            running: false,
            listen_port,
            uptime_seconds: 0,
            active_connections: 0,
            current_node: None,
            current_latency_ms: None,
        }
    }
}

/// Fan-out bus for node-list and proxy-status updates. Holds no mutex of
/// its own: `watch::Sender::send` never blocks, so notification here never
/// needs to happen "outside a lock" - there is no lock to hold in the
/// first place (§9's deadlock concern resolved by construction).
pub struct StatusBus {
    nodes_tx: watch::Sender<Vec<Node>>,
    status_tx: watch::Sender<ProxyStatus>,
    started_at: std::sync::Mutex<Option<Instant>>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (nodes_tx, _) = watch::channel(Vec::new());
        let (status_tx, _) = watch::channel(ProxyStatus::stopped(0));
        Self {
            nodes_tx,
            status_tx,
            started_at: std::sync::Mutex::new(None),
        }
    }

    pub fn subscribe_nodes(&self) -> watch::Receiver<Vec<Node>> {
        self.nodes_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ProxyStatus> {
        self.status_tx.subscribe()
    }

    /// Publishes the `nodes_updated` event (§4.2, §4.3). A lagging
    /// observer simply misses intermediate snapshots and reads the latest
    /// on its next poll, per §4.6.
    pub fn publish_nodes_updated(&self, nodes: Vec<Node>) {
        let _ = self.nodes_tx.send(nodes);
    }

    pub fn mark_started(&self) {
        *self.started_at.lock().unwrap() = Some(Instant::now());
    }

    pub fn mark_stopped(&self) {
        *self.started_at.lock().unwrap() = None;
    }

    fn uptime_seconds(&self) -> u64 {
        self.started_at
            .lock()
            .unwrap()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Publishes a fresh ProxyStatus snapshot. `current_latency_ms` is
    /// re-read from `current_node` at call time rather than cached at
    /// selection time, matching the original's behavior (SPEC_FULL.md §10.5).
    pub fn publish_status(
        &self,
        running: bool,
        listen_port: u16,
        active_connections: u32,
        current_node: Option<Node>,
    ) {
        let current_latency_ms = current_node.as_ref().and_then(|n| n.latency_ms);
        let snapshot = ProxyStatus {
            running,
            listen_port,
            uptime_seconds: self.uptime_seconds(),
            active_connections,
            current_node,
            current_latency_ms,
        };
        let _ = self.status_tx.send(snapshot);
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}
