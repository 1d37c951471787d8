//! C2: the node directory and selection state machine (§3, §4.2).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::node::Node;

/// `current_hostname` + `manual` flag, guarded by the same mutex as the
/// directory itself (§5).
#[derive(Debug, Clone, Default)]
struct Selection {
    current_hostname: Option<String>,
    manual: bool,
}

struct Inner {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    selection: Selection,
}

impl Inner {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            selection: Selection::default(),
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, node) in self.nodes.iter().enumerate() {
            self.index.insert(node.hostname.clone(), i);
        }
    }
}

/// The ordered node map plus selection state (§3). All mutation happens
/// under a single `std::sync::Mutex`; callers always get an owned snapshot
/// back rather than a guard, so the lock is never held across `.await`.
pub struct NodeDirectory {
    inner: Mutex<Inner>,
}

impl Default for NodeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Applies the §3 merge rule: inbound nodes carry over `latency_ms`,
    /// `reachable`, `status` from an existing node with the same hostname
    /// AND identical `(ip, port)`; everything else starts at `unknown`.
    /// Hostnames missing from `incoming` are dropped. Returns the merged
    /// count.
    pub fn merge_from_refresh(&self, incoming: Vec<Node>) -> usize {
        let mut guard = self.inner.lock().unwrap();

        let old_by_hostname: HashMap<String, Node> = guard
            .nodes
            .drain(..)
            .map(|n| (n.hostname.clone(), n))
            .collect();

        let mut merged = Vec::with_capacity(incoming.len());
        for mut node in incoming {
            if let Some(existing) = old_by_hostname.get(&node.hostname) {
                if existing.same_endpoint(&node) {
                    node.latency_ms = existing.latency_ms;
                    node.reachable = existing.reachable;
                    node.status = existing.status;
                }
            }
            merged.push(node);
        }

        let count = merged.len();
        guard.nodes = merged;
        guard.rebuild_index();

        // Stale selection: resolved lazily by get_current(), not eagerly
        // cleared here, matching §3's "resolved as no current node at use".
        count
    }

    /// Independent copy of the full node list, safe to hand across threads.
    pub fn list(&self) -> Vec<Node> {
        self.inner.lock().unwrap().nodes.clone()
    }

    /// Resolves the current selection to a node copy; a stale hostname
    /// (no longer present) resolves to `None` rather than an error.
    pub fn get_current(&self) -> Option<Node> {
        let guard = self.inner.lock().unwrap();
        let hostname = guard.selection.current_hostname.as_ref()?;
        let idx = *guard.index.get(hostname)?;
        guard.nodes.get(idx).cloned()
    }

    pub fn is_manual(&self) -> bool {
        self.inner.lock().unwrap().selection.manual
    }

    /// Sets `manual=true` and selects `hostname` if present; a no-op
    /// (leaving the selection unchanged) otherwise. Returns whether the
    /// hostname was found.
    pub fn manual_select(&self, hostname: &str) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if !guard.index.contains_key(hostname) {
            return false;
        }
        guard.selection.manual = true;
        guard.selection.current_hostname = Some(hostname.to_string());
        true
    }

    /// Returns to automatic selection without changing `current_hostname`.
    pub fn clear_manual(&self) {
        self.inner.lock().unwrap().selection.manual = false;
    }

    /// Sets `current_hostname` unless a manual selection is in effect.
    pub fn auto_select(&self, hostname: &str) {
        let mut guard = self.inner.lock().unwrap();
        if guard.selection.manual {
            return;
        }
        guard.selection.current_hostname = Some(hostname.to_string());
    }

    /// Records a probe outcome for `hostname` in place, if it still exists.
    pub fn apply_probe_result(&self, hostname: &str, reachable: bool, latency_ms: Option<f64>) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(&idx) = guard.index.get(hostname) {
            guard.nodes[idx].apply_probe(reachable, latency_ms);
        }
    }
}
