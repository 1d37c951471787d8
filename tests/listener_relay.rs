//! End-to-end exercise of the listener + relay scenario: fetch a node
//! directory over HTTP, probe it, start the proxy, relay a connection
//! through it to a local echo backend, then confirm the listener refuses
//! connections after stop.

use std::sync::Arc;

use routewise::config::StaticConfig;
use routewise::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                continue;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// A minimal HTTP/1.1 server that replies to any request with a fixed JSON
/// body, just enough for `reqwest::Client::get` to parse a response. Avoids
/// pulling in a mock-HTTP dependency the rest of the stack doesn't use.
async fn spawn_directory_server(body: String) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                continue;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn proxy_relays_a_full_connection_lifecycle() {
    let echo_addr = spawn_echo_server().await;

    let directory_json = format!(
        r#"[{{"hostname":"echo","ip":"{}","port":{},"enabled":true}}]"#,
        echo_addr.ip(),
        echo_addr.port()
    );
    let directory_addr = spawn_directory_server(directory_json).await;

    let free_port = {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        port
    };

    let config = StaticConfig {
        listen_host: "127.0.0.1".to_string(),
        listen_port: free_port,
        remote_nodes_api: format!("http://{directory_addr}/"),
        detect_interval_seconds: 60,
        auto_detect_enabled: false,
    };
    let engine = Engine::new(Arc::new(config));

    let count = engine.refresh_nodes().await.unwrap();
    assert_eq!(count, 1);

    engine.probe_all(true).await;
    let current = engine.current_node().expect("echo node should be selected");
    assert_eq!(current.hostname, "echo");
    assert!(current.reachable);

    engine.start_proxy().await.unwrap();
    assert!(engine.is_running());

    let mut client = TcpStream::connect(("127.0.0.1", free_port)).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    client.shutdown().await.unwrap();

    engine.stop_proxy();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let refused = TcpStream::connect(("127.0.0.1", free_port)).await;
    assert!(refused.is_err());
}
