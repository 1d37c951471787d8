//! Async fetch and validation of the remote node directory (§4.2, §6).

use std::time::Duration;

use serde::Deserialize;

use crate::error::DirectoryError;
use crate::node::{Node, NodeStatus};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Mirrors the inbound JSON shape from §6: `hostname` or `name`, with the
/// rest defaulted the same way `Node` is.
#[derive(Debug, Deserialize)]
struct RemoteNode {
    hostname: Option<String>,
    name: Option<String>,
    ip: String,
    port: u16,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_group")]
    group: String,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(default)]
    motd: Option<String>,
    #[serde(default)]
    online_count: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_group() -> String {
    "默认".to_string()
}
fn default_priority() -> i64 {
    100
}

/// Fetches and parses the remote node directory from `url` (§4.2). Nodes
/// with `enabled=false` are dropped at ingest and never returned; a node
/// missing both `hostname` and `name` fails the whole fetch, matching
/// `refresh_from_remote`'s "element fails" rule (§4.2) escalated to the
/// batch, since a partially-valid directory is not observable per §5's
/// "no partial updates" ordering guarantee.
pub async fn fetch_nodes(client: &reqwest::Client, url: &str) -> Result<Vec<Node>, DirectoryError> {
    let response = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|source| DirectoryError::Request {
            url: url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(DirectoryError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|source| DirectoryError::Request {
            url: url.to_string(),
            source,
        })?;

    let remote_nodes: Vec<RemoteNode> =
        serde_json::from_slice(&bytes).map_err(|source| DirectoryError::Parse {
            url: url.to_string(),
            source,
        })?;

    let mut nodes = Vec::with_capacity(remote_nodes.len());
    for (index, remote) in remote_nodes.into_iter().enumerate() {
        if !remote.enabled {
            continue;
        }
        let hostname = remote
            .hostname
            .or(remote.name)
            .filter(|s| !s.is_empty())
            .ok_or(DirectoryError::MissingHostname { index })?;

        // Port 0 has no meaning as a connect target; 1..=65535 is the valid
        // range (§8 boundary case).
        if remote.port == 0 {
            return Err(DirectoryError::InvalidPort { hostname });
        }

        nodes.push(Node {
            hostname,
            ip: remote.ip,
            port: remote.port,
            enabled: true,
            group: remote.group,
            priority: remote.priority,
            motd: remote.motd,
            online_count: remote.online_count,
            latency_ms: None,
            reachable: false,
            status: NodeStatus::Unknown,
        });
    }

    Ok(nodes)
}
