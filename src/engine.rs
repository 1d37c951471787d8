//! Public facade wiring C1-C6 behind the control surface §6 describes. An
//! explicit dependency-injected context replacing the original's closures
//! and configuration singleton, per §9's first design note.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::ConfigProvider;
use crate::directory::NodeDirectory;
use crate::error::{DirectoryError, ListenError};
use crate::listener::ProxyListener;
use crate::node::Node;
use crate::remote;
use crate::scheduler;
use crate::status::{ProxyStatus, StatusBus};

/// Wires the node directory, proxy listener, probe scheduler, and status
/// bus behind the control surface §6 names. One `Engine` owns one proxy's
/// worth of state; a host application (GUI shell, CLI, test harness)
/// constructs one from a `ConfigProvider` and drives it.
pub struct Engine {
    config: Arc<dyn ConfigProvider>,
    directory: Arc<NodeDirectory>,
    status: Arc<StatusBus>,
    listener: Arc<ProxyListener>,
    http_client: reqwest::Client,
    scheduler_stop: std::sync::Mutex<Option<watch::Sender<()>>>,
}

impl Engine {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        let directory = Arc::new(NodeDirectory::new());
        let status = Arc::new(StatusBus::new());
        let listener = Arc::new(ProxyListener::new(
            directory.clone(),
            status.clone(),
            config.listen_port(),
        ));

        Self {
            config,
            directory,
            status,
            listener,
            http_client: reqwest::Client::new(),
            scheduler_stop: std::sync::Mutex::new(None),
        }
    }

    /// Starts the accept loop and, if configured, the background probe
    /// scheduler.
    pub async fn start_proxy(&self) -> Result<(), ListenError> {
        self.listener.start(self.config.listen_host()).await?;
        self.spawn_scheduler_loop_if_needed();
        Ok(())
    }

    pub fn stop_proxy(&self) {
        self.listener.stop();
        if let Some(tx) = self.scheduler_stop.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_running()
    }

    /// Fetches the remote directory and merges it in; on failure the
    /// directory is left untouched and the error is returned (§4.2, §7).
    pub async fn refresh_nodes(&self) -> Result<usize, DirectoryError> {
        match remote::fetch_nodes(&self.http_client, self.config.remote_nodes_api()).await {
            Ok(nodes) => {
                let count = self.directory.merge_from_refresh(nodes);
                self.status.publish_nodes_updated(self.directory.list());
                Ok(count)
            }
            Err(err) => {
                tracing::warn!(error = %err, "directory refresh failed");
                Err(err)
            }
        }
    }

    pub async fn probe_all(&self, auto_switch: bool) {
        scheduler::probe_all(&self.directory, &self.status, auto_switch).await;
        self.publish_listener_status();
    }

    pub fn select_node(&self, hostname: &str) -> bool {
        let ok = self.directory.manual_select(hostname);
        if ok {
            self.publish_listener_status();
        }
        ok
    }

    pub fn clear_manual_selection(&self) {
        self.directory.clear_manual();
    }

    pub fn current_node(&self) -> Option<Node> {
        self.directory.get_current()
    }

    pub fn list_nodes(&self) -> Vec<Node> {
        self.directory.list()
    }

    pub fn subscribe_nodes(&self) -> watch::Receiver<Vec<Node>> {
        self.status.subscribe_nodes()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ProxyStatus> {
        self.status.subscribe_status()
    }

    fn publish_listener_status(&self) {
        self.status.publish_status(
            self.listener.is_running(),
            self.listener.listen_port(),
            self.listener.active_connections(),
            self.directory.get_current(),
        );
    }

    fn spawn_scheduler_loop_if_needed(&self) {
        let (tx, rx) = watch::channel(());
        *self.scheduler_stop.lock().unwrap() = Some(tx);

        let directory = self.directory.clone();
        let status = self.status.clone();
        let listener = self.listener.clone();
        let auto_detect_enabled = self.config.auto_detect_enabled();
        let interval = std::time::Duration::from_secs(self.config.detect_interval_seconds());

        tokio::spawn(scheduler::run_background_loop(
            directory,
            status,
            listener,
            auto_detect_enabled,
            interval,
            rx,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;

    #[tokio::test]
    async fn fresh_engine_has_no_current_node() {
        let engine = Engine::new(Arc::new(StaticConfig::default()));
        assert!(engine.current_node().is_none());
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn select_node_rejects_unknown_hostname() {
        let engine = Engine::new(Arc::new(StaticConfig::default()));
        assert!(!engine.select_node("ghost"));
    }
}
