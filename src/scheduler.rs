//! C3: the probe scheduler; bounded fan-out `probe_all` plus a cancellable
//! background loop (§4.3).

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Semaphore};

use crate::directory::NodeDirectory;
use crate::listener::ProxyListener;
use crate::node::Node;
use crate::probe::probe;
use crate::status::StatusBus;

/// Caps concurrent in-flight probes per §4.3/§9's "bound parallelism with a
/// worker pool sized to, e.g., 16".
const MAX_CONCURRENT_PROBES: usize = 16;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Picks the best reachable node per §4.3: minimum latency, ties broken by
/// `priority` ascending then `hostname` lexicographic.
fn pick_best(nodes: &[Node]) -> Option<&Node> {
    nodes
        .iter()
        .filter(|n| n.reachable)
        .min_by(|a, b| {
            a.latency_ms
                .partial_cmp(&b.latency_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.priority.cmp(&b.priority))
                .then(a.hostname.cmp(&b.hostname))
        })
}

/// Probes every node in `directory` concurrently (bounded fan-out), records
/// outcomes, and optionally auto-selects the best reachable node. Emits one
/// `nodes_updated` event at the end regardless of outcome (§4.3, §5).
pub async fn probe_all(directory: &NodeDirectory, status: &StatusBus, auto_switch: bool) {
    let nodes = directory.list();
    if nodes.is_empty() {
        return;
    }

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES));
    let mut tasks = FuturesUnordered::new();

    for node in nodes {
        let semaphore = semaphore.clone();
        tasks.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let outcome = probe(&node, PROBE_TIMEOUT).await;
            tracing::debug!(
                hostname = %node.hostname,
                reachable = outcome.reachable,
                latency_ms = ?outcome.latency_ms,
                "probe finished"
            );
            (node.hostname, outcome)
        });
    }

    while let Some((hostname, outcome)) = tasks.next().await {
        directory.apply_probe_result(&hostname, outcome.reachable, outcome.latency_ms);
    }

    if auto_switch {
        let nodes = directory.list();
        if let Some(best) = pick_best(&nodes) {
            directory.auto_select(&best.hostname);
        }
    }

    status.publish_nodes_updated(directory.list());
}

/// Drives the periodic background probe loop described in §4.3. Runs until
/// `stop_rx` observes a change, waking promptly rather than completing the
/// full sleep interval. Republishes the listener's ProxyStatus after each
/// round so an auto-switched current node is reflected immediately (§4.5),
/// the same way `Engine::probe_all` does for the on-demand path.
pub async fn run_background_loop(
    directory: Arc<NodeDirectory>,
    status: Arc<StatusBus>,
    listener: Arc<ProxyListener>,
    auto_detect_enabled: bool,
    detect_interval: Duration,
    mut stop_rx: watch::Receiver<()>,
) {
    if !auto_detect_enabled {
        let _ = stop_rx.changed().await;
        return;
    }

    loop {
        let auto_switch = !directory.is_manual();
        probe_all(&directory, &status, auto_switch).await;
        listener.publish_status();

        tokio::select! {
            _ = tokio::time::sleep(detect_interval) => {}
            _ = stop_rx.changed() => {
                tracing::info!("probe scheduler loop stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;

    fn node(hostname: &str, priority: i64, reachable: bool, latency_ms: Option<f64>) -> Node {
        Node {
            hostname: hostname.to_string(),
            ip: "127.0.0.1".to_string(),
            port: 1,
            enabled: true,
            group: "默认".to_string(),
            priority,
            motd: None,
            online_count: 0,
            latency_ms,
            reachable,
            status: if reachable {
                NodeStatus::Good
            } else {
                NodeStatus::Unreachable
            },
        }
    }

    #[test]
    fn pick_best_prefers_lowest_latency() {
        let nodes = vec![
            node("A", 100, true, Some(200.0)),
            node("B", 100, true, Some(40.0)),
            node("C", 100, false, None),
        ];
        assert_eq!(pick_best(&nodes).unwrap().hostname, "B");
    }

    #[test]
    fn pick_best_ties_broken_by_priority_then_hostname() {
        let nodes = vec![
            node("B", 50, true, Some(10.0)),
            node("A", 10, true, Some(10.0)),
        ];
        assert_eq!(pick_best(&nodes).unwrap().hostname, "A");

        let nodes = vec![
            node("B", 10, true, Some(10.0)),
            node("A", 10, true, Some(10.0)),
        ];
        assert_eq!(pick_best(&nodes).unwrap().hostname, "A");
    }

    #[test]
    fn pick_best_none_when_nothing_reachable() {
        let nodes = vec![node("A", 100, false, None)];
        assert!(pick_best(&nodes).is_none());
    }

    #[tokio::test]
    async fn probe_all_on_empty_directory_is_noop() {
        let directory = NodeDirectory::new();
        let status = StatusBus::new();
        probe_all(&directory, &status, true).await;
        assert!(directory.list().is_empty());
    }

    #[tokio::test]
    async fn probe_all_auto_switch_selects_best_reachable() {
        // S4: A slow+reachable, B fast+reachable, C unreachable.
        use tokio::net::TcpListener;

        let good = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good_addr = good.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if let Ok((mut sock, _)) = good.accept().await {
                    tokio::spawn(async move {
                        use tokio::io::{AsyncReadExt, AsyncWriteExt};
                        let mut buf = [0u8; 256];
                        let _ = sock.read(&mut buf).await;
                        let _ = sock.write_all(&[0x01]).await;
                    });
                }
            }
        });

        let directory = NodeDirectory::new();
        directory.merge_from_refresh(vec![
            {
                let mut n = node("A", 100, false, None);
                n.ip = good_addr.ip().to_string();
                n.port = good_addr.port();
                n
            },
            {
                let mut n = node("B", 100, false, None);
                n.ip = "127.0.0.1".to_string();
                n.port = 1; // nothing listening
                n
            },
        ]);

        let status = StatusBus::new();
        probe_all(&directory, &status, true).await;

        let current = directory.get_current();
        assert_eq!(current.unwrap().hostname, "A");
    }
}
