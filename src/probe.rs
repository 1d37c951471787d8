//! C1: the handshake-based liveness + latency probe (§4.1).

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::ProbeError;
use crate::node::Node;
use crate::varint::{write_string, write_varint};

/// Protocol version sent in the handshake packet. Matches the widely
/// deployed game-server status-ping handshake this spec targets (§4.1);
/// `original_source/mtrproxy/nodes.py::detect_latency` uses the same value.
const HANDSHAKE_PROTOCOL_VERSION: u32 = 47;
/// Next-state field requesting the server status response.
const HANDSHAKE_NEXT_STATE: u32 = 1;

/// Result of a single probe: reachability plus, when reachable, the
/// round-trip latency in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub latency_ms: Option<f64>,
}

impl ProbeOutcome {
    fn unreachable() -> Self {
        Self {
            reachable: false,
            latency_ms: None,
        }
    }
}

fn handshake_packet(host: &str, port: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + host.len());
    payload.push(0x00); // packet id
    write_varint(&mut payload, HANDSHAKE_PROTOCOL_VERSION);
    write_string(&mut payload, host);
    payload.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut payload, HANDSHAKE_NEXT_STATE);

    let mut framed = Vec::with_capacity(payload.len() + 5);
    write_varint(&mut framed, payload.len() as u32);
    framed.extend_from_slice(&payload);
    framed
}

fn status_request_packet() -> Vec<u8> {
    // payload = 0x00, framed as varint(len) ++ payload.
    vec![0x01, 0x00]
}

/// Performs one handshake-based probe against `node` with the given
/// `timeout`. Fails closed: any network error, protocol error, or deadline
/// overrun yields `reachable = false` with no latency (§4.1, §7).
pub async fn probe(node: &Node, probe_timeout: Duration) -> ProbeOutcome {
    let addr = format!("{}:{}", node.ip, node.port);

    match timeout(probe_timeout, run_probe(&node.ip, &addr)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            tracing::trace!(%addr, error = %err, "probe failed");
            ProbeOutcome::unreachable()
        }
        Err(_) => {
            let err = ProbeError::ConnectTimeout {
                addr: addr.clone(),
                timeout_ms: probe_timeout.as_millis() as u64,
            };
            tracing::trace!(%addr, error = %err, "probe timed out");
            ProbeOutcome::unreachable()
        }
    }
}

async fn run_probe(host: &str, addr: &str) -> Result<ProbeOutcome, ProbeError> {
    let started = Instant::now();

    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ProbeError::Network {
            addr: addr.to_string(),
            source,
        })?;

    let port: u16 = addr
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);

    stream
        .write_all(&handshake_packet(host, port))
        .await
        .map_err(|source| ProbeError::Network {
            addr: addr.to_string(),
            source,
        })?;
    stream
        .write_all(&status_request_packet())
        .await
        .map_err(|source| ProbeError::Network {
            addr: addr.to_string(),
            source,
        })?;

    let mut buf = [0u8; 1];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|source| ProbeError::Network {
            addr: addr.to_string(),
            source,
        })?;

    if n == 0 {
        return Err(ProbeError::EmptyReply {
            addr: addr.to_string(),
        });
    }

    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    Ok(ProbeOutcome {
        reachable: true,
        latency_ms: Some(latency_ms),
    })
}
