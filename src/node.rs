use serde::{Deserialize, Serialize};

fn default_group() -> String {
    "默认".to_string()
}

fn default_priority() -> i64 {
    100
}

fn default_enabled() -> bool {
    true
}

/// Liveness/latency classification assigned after each probe (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Unknown,
    Good,
    Normal,
    Slow,
    Unreachable,
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus::Unknown
    }
}

impl NodeStatus {
    /// Classification rule from §3: unreachable if the probe failed, else
    /// bucketed by round-trip latency.
    pub fn classify(reachable: bool, latency_ms: Option<f64>) -> Self {
        if !reachable {
            return NodeStatus::Unreachable;
        }
        match latency_ms {
            Some(ms) if ms < 50.0 => NodeStatus::Good,
            Some(ms) if ms < 150.0 => NodeStatus::Normal,
            Some(_) => NodeStatus::Slow,
            None => NodeStatus::Unreachable,
        }
    }
}

/// A candidate backend node (§3). `hostname` is the directory's identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub hostname: String,
    pub ip: String,
    pub port: u16,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default = "default_priority")]
    pub priority: i64,

    #[serde(default)]
    pub motd: Option<String>,

    #[serde(default)]
    pub online_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,

    #[serde(default)]
    pub reachable: bool,

    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// True if `other` refers to the same physical endpoint (same ip/port),
    /// the condition under which a directory refresh carries over probe
    /// state rather than resetting it to `unknown` (§3 merge rule).
    pub fn same_endpoint(&self, other: &Node) -> bool {
        self.ip == other.ip && self.port == other.port
    }

    /// Records a probe outcome in place, deriving `status` per the
    /// classification rule.
    pub fn apply_probe(&mut self, reachable: bool, latency_ms: Option<f64>) {
        self.reachable = reachable;
        self.latency_ms = if reachable { latency_ms } else { None };
        self.status = NodeStatus::classify(reachable, self.latency_ms);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn classify_buckets_by_latency() {
        assert_eq!(NodeStatus::classify(false, None), NodeStatus::Unreachable);
        assert_eq!(NodeStatus::classify(true, Some(10.0)), NodeStatus::Good);
        assert_eq!(NodeStatus::classify(true, Some(49.9)), NodeStatus::Good);
        assert_eq!(NodeStatus::classify(true, Some(50.0)), NodeStatus::Normal);
        assert_eq!(NodeStatus::classify(true, Some(149.9)), NodeStatus::Normal);
        assert_eq!(NodeStatus::classify(true, Some(150.0)), NodeStatus::Slow);
        assert_eq!(NodeStatus::classify(true, Some(9000.0)), NodeStatus::Slow);
    }

    #[test]
    fn apply_probe_clears_latency_on_failure() {
        let mut node = sample_node("a");
        node.apply_probe(true, Some(42.0));
        assert_eq!(node.latency_ms, Some(42.0));
        assert_eq!(node.status, NodeStatus::Good);

        node.apply_probe(false, None);
        assert_eq!(node.latency_ms, None);
        assert!(!node.reachable);
        assert_eq!(node.status, NodeStatus::Unreachable);
    }

    #[test]
    fn same_endpoint_ignores_hostname() {
        let a = sample_node("a");
        let mut b = sample_node("b");
        b.ip = a.ip.clone();
        b.port = a.port;
        assert!(a.same_endpoint(&b));

        let mut c = sample_node("c");
        c.port = a.port + 1;
        assert!(!a.same_endpoint(&c));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{"hostname":"a","ip":"1.2.3.4","port":25565}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.group, "默认");
        assert_eq!(node.priority, 100);
        assert!(node.enabled);
        assert_eq!(node.online_count, 0);
        assert_eq!(node.status, NodeStatus::Unknown);
    }

    pub(crate) fn sample_node(hostname: &str) -> Node {
        Node {
            hostname: hostname.to_string(),
            ip: "127.0.0.1".to_string(),
            port: 25565,
            enabled: true,
            group: default_group(),
            priority: default_priority(),
            motd: None,
            online_count: 0,
            latency_ms: None,
            reachable: false,
            status: NodeStatus::Unknown,
        }
    }
}
