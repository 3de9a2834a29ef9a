//! Cloud-gateway election among LAN peers.
//!
//! Every interval the node ranks itself against the LAN-discovered
//! peers; the lexicographically smallest node id is the gateway. The
//! outcome is published through a watch channel so subscribers only
//! wake on change.

use crate::PeerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Election knobs.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// This node's id.
    pub node_id: String,
    /// Time between elections.
    pub interval: Duration,
}

impl ElectionConfig {
    /// Defaults: elect every 5 s.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            interval: Duration::from_secs(5),
        }
    }
}

/// The current gateway designation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GatewayStatus {
    /// Node id of the elected gateway, if any election has run.
    pub leader_node_id: Option<String>,
    /// Whether this node is the gateway.
    pub is_gateway: bool,
}

/// Periodically designates the cloud gateway.
pub struct LeaderElection {
    config: ElectionConfig,
    registry: Arc<PeerRegistry>,
    status_tx: watch::Sender<GatewayStatus>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElection {
    /// Create an election over the given peer registry.
    pub fn new(config: ElectionConfig, registry: Arc<PeerRegistry>) -> Self {
        let (status_tx, _) = watch::channel(GatewayStatus::default());
        Self {
            config,
            registry,
            status_tx,
            tick_task: Mutex::new(None),
        }
    }

    /// Subscribe to gateway changes. The receiver always holds the
    /// latest status.
    pub fn subscribe(&self) -> watch::Receiver<GatewayStatus> {
        self.status_tx.subscribe()
    }

    /// The latest election outcome.
    pub fn current(&self) -> GatewayStatus {
        self.status_tx.borrow().clone()
    }

    /// Run one election immediately.
    pub fn elect_now(&self) {
        let leader = elect(&self.config.node_id, &self.registry);
        publish(&self.status_tx, &self.config.node_id, leader);
    }

    /// Start electing: once immediately, then on every interval tick.
    pub async fn start(&self) {
        let mut guard = self.tick_task.lock().await;
        if guard.is_some() {
            return;
        }

        self.elect_now();

        let node_id = self.config.node_id.clone();
        let registry = self.registry.clone();
        let status_tx = self.status_tx.clone();
        let election_interval = self.config.interval;
        let task = tokio::spawn(async move {
            let mut timer = interval(election_interval);
            loop {
                timer.tick().await;
                let leader = elect(&node_id, &registry);
                publish(&status_tx, &node_id, leader);
            }
        });
        *guard = Some(task);
        tracing::info!(interval = ?self.config.interval, "leader election started");
    }

    /// Cancel the election timer. Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(task) = self.tick_task.lock().await.take() {
            task.abort();
            tracing::info!("leader election stopped");
        }
    }
}

/// The gateway is the smallest node id among self and the LAN peers.
fn elect(own_node_id: &str, registry: &PeerRegistry) -> String {
    registry
        .lan_peers()
        .into_iter()
        .map(|peer| peer.node_id)
        .chain(std::iter::once(own_node_id.to_string()))
        .min()
        .unwrap_or_else(|| own_node_id.to_string())
}

fn publish(status_tx: &watch::Sender<GatewayStatus>, own_node_id: &str, leader: String) {
    let next = GatewayStatus {
        is_gateway: leader == own_node_id,
        leader_node_id: Some(leader),
    };
    status_tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        if current.leader_node_id != next.leader_node_id {
            tracing::info!(
                leader = next.leader_node_id.as_deref().unwrap_or(""),
                is_gateway = next.is_gateway,
                "gateway changed"
            );
        }
        *current = next.clone();
        true
    });
}
