use thiserror::Error;

/// Errors from a single handshake probe against one node.
///
/// Per-probe errors are never surfaced upward: the scheduler records them on
/// the `Node` as `reachable = false` and moves on (§7).
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("network error talking to {addr}: {source}")]
    Network {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer at {addr} closed the connection without replying")]
    EmptyReply { addr: String },
}

/// Errors from fetching and parsing the remote node directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned non-success status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to parse node directory JSON from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("node at index {index} is missing a non-empty hostname/name")]
    MissingHostname { index: usize },

    #[error("node {hostname} has invalid port 0")]
    InvalidPort { hostname: String },
}

/// Errors from binding and starting the proxy listener.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("proxy is already running")]
    AlreadyRunning,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
