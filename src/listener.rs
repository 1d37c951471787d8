//! C5: the proxy listener state machine and accept loop (§4.5).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::directory::NodeDirectory;
use crate::error::ListenError;
use crate::relay;
use crate::status::StatusBus;

const LISTEN_BACKLOG: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Shared {
    state: Mutex<State>,
    active_connections: AtomicU32,
    listen_port: Mutex<u16>,
}

/// Owns the bound socket, the accept loop, and connection accounting
/// (§4.5). Shares the directory (to pick a target per connection) and the
/// status bus (to publish transitions) but owns no locks in common with
/// either; per the strict lock order in §5, code that needs both the
/// listener and directory state always takes the listener lock first.
pub struct ProxyListener {
    shared: Arc<Shared>,
    directory: Arc<NodeDirectory>,
    status: Arc<StatusBus>,
    stop_tx: Mutex<Option<watch::Sender<()>>>,
}

impl ProxyListener {
    pub fn new(directory: Arc<NodeDirectory>, status: Arc<StatusBus>, listen_port: u16) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Stopped),
                active_connections: AtomicU32::new(0),
                listen_port: Mutex::new(listen_port),
            }),
            directory,
            status,
            stop_tx: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.shared.state.lock().unwrap() == State::Running
    }

    pub fn active_connections(&self) -> u32 {
        self.shared.active_connections.load(Ordering::SeqCst)
    }

    pub fn listen_port(&self) -> u16 {
        *self.shared.listen_port.lock().unwrap()
    }

    /// `listen_port` is mutable only while stopped (§4.5); changing it
    /// while running does not rebind.
    pub fn set_listen_port(&self, port: u16) -> bool {
        let state = *self.shared.state.lock().unwrap();
        if state != State::Stopped {
            return false;
        }
        *self.shared.listen_port.lock().unwrap() = port;
        true
    }

    /// Binds and launches the accept loop (`stopped → starting → running`).
    /// On bind failure the listener stays `stopped`; a status snapshot with
    /// `running=false` is still published (§4.5, §7).
    pub async fn start(&self, listen_host: &str) -> Result<(), ListenError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != State::Stopped {
                return Err(ListenError::AlreadyRunning);
            }
            *state = State::Starting;
        }

        let port = self.listen_port();
        let addr = format!("{listen_host}:{port}");
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|_| ListenError::Bind {
                addr: addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid address"),
            })?;

        let listener = match bind_listener(socket_addr) {
            Ok(listener) => listener,
            Err(source) => {
                *self.shared.state.lock().unwrap() = State::Stopped;
                self.publish_status();
                return Err(ListenError::Bind { addr, source });
            }
        };

        let (stop_tx, stop_rx) = watch::channel(());
        *self.stop_tx.lock().unwrap() = Some(stop_tx);

        *self.shared.state.lock().unwrap() = State::Running;
        tracing::info!(%addr, "proxy listener started");
        self.publish_status();

        let shared = self.shared.clone();
        let directory = self.directory.clone();
        let status = self.status.clone();
        tokio::spawn(accept_loop(listener, shared, directory, status, stop_rx));

        Ok(())
    }

    /// Closes the listening socket, which unblocks the accept loop
    /// deterministically. In-flight relays are left to drain on their own
    /// (§4.5, §9).
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if *state != State::Running {
            return;
        }
        *state = State::Stopping;
        drop(state);

        if let Some(tx) = self.stop_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Publishes a fresh ProxyStatus snapshot reflecting the listener's
    /// current running/port/connection-count state and whatever node the
    /// directory currently resolves to. Exposed crate-wide so callers that
    /// change the current node from outside the listener (manual select,
    /// probe-driven auto-switch) can republish without duplicating the
    /// snapshot logic.
    pub(crate) fn publish_status(&self) {
        let current_node = self.directory.get_current();
        self.status.publish_status(
            self.is_running(),
            self.listen_port(),
            self.active_connections(),
            current_node,
        );
    }
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    directory: Arc<NodeDirectory>,
    status: Arc<StatusBus>,
    mut stop_rx: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                break;
            }
            accepted = listener.accept() => {
                let Ok((client, _peer)) = accepted else { continue };

                let current = directory.get_current();
                let Some(node) = current.filter(|n| n.reachable) else {
                    let _ = client.set_linger(Some(std::time::Duration::from_secs(0)));
                    drop(client);
                    continue;
                };

                shared.active_connections.fetch_add(1, Ordering::SeqCst);
                publish(&shared, &directory, &status);

                let shared = shared.clone();
                let directory = directory.clone();
                let status = status.clone();
                let backend_addr = format!("{}:{}", node.ip, node.port);
                tokio::spawn(async move {
                    relay::relay(client, &backend_addr).await;
                    shared.active_connections.fetch_sub(1, Ordering::SeqCst);
                    publish(&shared, &directory, &status);
                });
            }
        }
    }

    *shared.state.lock().unwrap() = State::Stopped;
    tracing::info!("proxy listener stopped");
    publish(&shared, &directory, &status);
}

fn publish(shared: &Arc<Shared>, directory: &Arc<NodeDirectory>, status: &Arc<StatusBus>) {
    let running = *shared.state.lock().unwrap() == State::Running;
    let port = *shared.listen_port.lock().unwrap();
    let active = shared.active_connections.load(Ordering::SeqCst);
    status.publish_status(running, port, active, directory.get_current());
}
