//! Periodic pull synchronization against every known peer.

use crate::SwarmError;
use dashmap::DashMap;
use docmesh_core::{HlcClock, MergePolicy};
use docmesh_net::apply::apply_entries;
use docmesh_net::{ChannelSecurity, ClientConfig, SyncClient};
use docmesh_store::DocumentStore;
use docmesh_types::RemotePeer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Orchestrator knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// This node's id.
    pub node_id: String,
    /// Shared cluster secret presented to peers.
    pub auth_token: String,
    /// Time between sync rounds.
    pub sync_interval: Duration,
    /// Pull batch size.
    pub batch_size: usize,
    /// Channel security for outbound connections.
    pub security: ChannelSecurity,
    /// Whether to offer compression.
    pub compression: bool,
    /// Conflict resolution policy for pulled entries.
    pub policy: MergePolicy,
}

impl OrchestratorConfig {
    /// Defaults: 5 s interval, batches of 100, encrypted, compressed.
    pub fn new(node_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            auth_token: auth_token.into(),
            sync_interval: Duration::from_secs(5),
            batch_size: 100,
            security: ChannelSecurity::Encrypted,
            compression: true,
            policy: MergePolicy::LastWriteWins,
        }
    }
}

/// Pulls changes from every known peer on a fixed interval.
///
/// Peers sync in parallel within one round; one peer failing or
/// hanging never poisons the others or the next round.
pub struct SyncOrchestrator<S> {
    config: OrchestratorConfig,
    store: Arc<S>,
    clock: Arc<HlcClock>,
    peers: Arc<DashMap<String, RemotePeer>>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> SyncOrchestrator<S>
where
    S: DocumentStore + 'static,
{
    /// Create an orchestrator with an empty peer set.
    pub fn new(config: OrchestratorConfig, store: Arc<S>, clock: Arc<HlcClock>) -> Self {
        Self {
            config,
            store,
            clock,
            peers: Arc::new(DashMap::new()),
            tick_task: Mutex::new(None),
        }
    }

    /// Add or refresh a peer; duplicates by node id collapse. The own
    /// node id is never added.
    pub fn add_peer(&self, peer: RemotePeer) {
        if peer.node_id == self.config.node_id {
            return;
        }
        let fresh = self
            .peers
            .insert(peer.node_id.clone(), peer.clone())
            .is_none();
        if fresh {
            tracing::info!(peer = %peer.node_id, host = %peer.host, port = peer.port, "sync peer added");
        }
    }

    /// Remove a peer by node id.
    pub fn remove_peer(&self, node_id: &str) {
        self.peers.remove(node_id);
    }

    /// Current number of peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Start the periodic sync rounds.
    pub async fn start(&self) {
        let mut guard = self.tick_task.lock().await;
        if guard.is_some() {
            return;
        }

        let config = self.config.clone();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let peers = self.peers.clone();

        let task = tokio::spawn(async move {
            let mut timer = interval(config.sync_interval);
            loop {
                timer.tick().await;
                run_round(&config, &store, &clock, &peers).await;
            }
        });
        *guard = Some(task);
        tracing::info!(interval = ?self.config.sync_interval, "sync orchestrator started");
    }

    /// Stop the rounds. Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(task) = self.tick_task.lock().await.take() {
            task.abort();
            tracing::info!("sync orchestrator stopped");
        }
    }

    /// Run one synchronous round immediately, outside the timer. Used
    /// by tests and by callers that want a sync-now button.
    pub async fn sync_once(&self) {
        run_round(&self.config, &self.store, &self.clock, &self.peers).await;
    }
}

async fn run_round<S>(
    config: &OrchestratorConfig,
    store: &Arc<S>,
    clock: &Arc<HlcClock>,
    peers: &Arc<DashMap<String, RemotePeer>>,
) where
    S: DocumentStore + 'static,
{
    let snapshot: Vec<RemotePeer> = peers
        .iter()
        .filter(|entry| entry.value().enabled)
        .map(|entry| entry.value().clone())
        .collect();
    if snapshot.is_empty() {
        return;
    }

    let rounds = snapshot.into_iter().map(|peer| {
        let config = config.clone();
        let store = store.clone();
        let clock = clock.clone();
        async move {
            let node_id = peer.node_id.clone();
            match sync_peer(&config, &store, &clock, &peer).await {
                Ok(applied) if applied > 0 => {
                    tracing::info!(peer = %node_id, applied, "pulled changes");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(peer = %node_id, "sync failed: {err}");
                }
            }
        }
    });
    futures::future::join_all(rounds).await;
}

async fn sync_peer<S>(
    config: &OrchestratorConfig,
    store: &Arc<S>,
    clock: &Arc<HlcClock>,
    peer: &RemotePeer,
) -> Result<usize, SwarmError>
where
    S: DocumentStore + 'static,
{
    let mut client = SyncClient::new(ClientConfig {
        node_id: config.node_id.clone(),
        host: peer.host.clone(),
        port: peer.port,
        auth_token: config.auth_token.clone(),
        security: config.security,
        compression: config.compression,
    });
    client.connect().await?;

    let mut since = store.latest_timestamp().await?;
    let mut total_applied = 0;
    loop {
        let (entries, has_more) = client.pull_changes(&since, config.batch_size).await?;
        if entries.is_empty() {
            break;
        }
        since = entries
            .last()
            .map(|entry| entry.timestamp.clone())
            .unwrap_or(since);
        total_applied +=
            apply_entries(store.as_ref(), clock, &entries, config.policy).await?;
        if !has_more {
            break;
        }
    }

    client.disconnect().await;
    Ok(total_applied)
}
