//! Epidemic propagation of fresh writes.
//!
//! Every gossip message carries a unique id, its originating node and a
//! hop counter. Receivers drop duplicates and messages that ran out of
//! hops, apply the rest locally, and re-enqueue them for their own
//! peers. The outbound queue processes one message at a time with a
//! damping delay so a write burst does not become a packet storm.

use crate::SwarmError;
use dashmap::DashMap;
use docmesh_core::{HlcClock, MergePolicy};
use docmesh_net::apply::apply_entries;
use docmesh_net::{ChannelSecurity, ClientConfig, SyncClient};
use docmesh_store::DocumentStore;
use docmesh_types::{GossipRelay, OplogEntry, RemotePeer};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

/// Gossip knobs.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// This node's id; stamped as the source of originated messages.
    pub node_id: String,
    /// Shared cluster secret presented to peers.
    pub auth_token: String,
    /// Messages stop propagating at this hop count.
    pub max_hops: u32,
    /// Damping delay before each fan-out.
    pub send_delay: Duration,
    /// How long seen message ids are remembered.
    pub seen_retention: Duration,
    /// How often the seen set is swept.
    pub cleanup_interval: Duration,
    /// Channel security for outbound connections.
    pub security: ChannelSecurity,
    /// Whether to offer compression.
    pub compression: bool,
    /// Conflict resolution policy for received entries.
    pub policy: MergePolicy,
}

impl GossipConfig {
    /// Defaults: 3 hops, 100 ms delay, 5 min retention swept every
    /// 60 s, encrypted.
    pub fn new(node_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            auth_token: auth_token.into(),
            max_hops: 3,
            send_delay: Duration::from_millis(100),
            seen_retention: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
            security: ChannelSecurity::Encrypted,
            compression: true,
            policy: MergePolicy::LastWriteWins,
        }
    }
}

struct GossipState<S> {
    config: GossipConfig,
    store: Arc<S>,
    clock: Arc<HlcClock>,
    peers: DashMap<String, RemotePeer>,
    seen: DashMap<String, Instant>,
    queue_tx: mpsc::UnboundedSender<GossipRelay>,
}

/// Fans fresh writes out to peers and absorbs gossip from them.
pub struct GossipService<S> {
    state: Arc<GossipState<S>>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<GossipRelay>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S> GossipService<S>
where
    S: DocumentStore + 'static,
{
    /// Create a gossip service with an empty peer set.
    pub fn new(config: GossipConfig, store: Arc<S>, clock: Arc<HlcClock>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(GossipState {
                config,
                store,
                clock,
                peers: DashMap::new(),
                seen: DashMap::new(),
                queue_tx,
            }),
            queue_rx: Mutex::new(Some(queue_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Add or refresh a peer; never adds this node itself.
    pub fn add_peer(&self, peer: RemotePeer) {
        if peer.node_id == self.state.config.node_id {
            return;
        }
        self.state.peers.insert(peer.node_id.clone(), peer);
    }

    /// Remove a peer by node id.
    pub fn remove_peer(&self, node_id: &str) {
        self.state.peers.remove(node_id);
    }

    /// Number of remembered message ids; shrinks as the sweeper runs.
    pub fn seen_len(&self) -> usize {
        self.state.seen.len()
    }

    /// Announce freshly written local entries to the cluster.
    pub fn propagate(&self, entries: Vec<OplogEntry>) {
        if entries.is_empty() {
            return;
        }
        let message_id = mint_message_id(&self.state.config.node_id);
        self.state.seen.insert(message_id.clone(), Instant::now());
        let relay = GossipRelay {
            entries,
            source_node_id: self.state.config.node_id.clone(),
            message_id,
            hops: 0,
        };
        let _ = self.state.queue_tx.send(relay);
    }

    /// Absorb a gossip message received from a peer.
    pub async fn handle_incoming(&self, relay: GossipRelay) -> Result<(), SwarmError> {
        handle_incoming(&self.state, relay).await
    }

    /// Start the queue processor and the seen-set sweeper, and drain
    /// `intake` (the server's gossip-tagged pushes) into this service.
    pub async fn start(&self, intake: Option<mpsc::UnboundedReceiver<GossipRelay>>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let queue_rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .expect("gossip service started twice");
        tasks.push(tokio::spawn(process_queue(self.state.clone(), queue_rx)));
        tasks.push(tokio::spawn(sweep_seen(self.state.clone())));
        if let Some(mut intake) = intake {
            let state = self.state.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(relay) = intake.recv().await {
                    if let Err(err) = handle_incoming(&state, relay).await {
                        tracing::warn!("failed to absorb gossip: {err}");
                    }
                }
            }));
        }
        tracing::info!(
            max_hops = self.state.config.max_hops,
            "gossip service started"
        );
    }

    /// Stop all gossip tasks. Safe to call more than once.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

async fn handle_incoming<S>(state: &GossipState<S>, relay: GossipRelay) -> Result<(), SwarmError>
where
    S: DocumentStore + 'static,
{
    if state.seen.contains_key(&relay.message_id) {
        tracing::debug!(message = %relay.message_id, "dropping duplicate gossip");
        return Ok(());
    }
    if relay.hops >= state.config.max_hops {
        tracing::debug!(message = %relay.message_id, hops = relay.hops, "gossip out of hops");
        return Ok(());
    }
    state.seen.insert(relay.message_id.clone(), Instant::now());

    let applied = apply_entries(
        state.store.as_ref(),
        &state.clock,
        &relay.entries,
        state.config.policy,
    )
    .await?;
    tracing::debug!(
        message = %relay.message_id,
        source = %relay.source_node_id,
        hops = relay.hops,
        applied,
        "absorbed gossip"
    );

    let _ = state.queue_tx.send(GossipRelay {
        hops: relay.hops + 1,
        ..relay
    });
    Ok(())
}

async fn process_queue<S>(
    state: Arc<GossipState<S>>,
    mut queue_rx: mpsc::UnboundedReceiver<GossipRelay>,
) where
    S: DocumentStore + 'static,
{
    while let Some(relay) = queue_rx.recv().await {
        sleep(state.config.send_delay).await;

        let targets: Vec<RemotePeer> = state
            .peers
            .iter()
            .filter(|entry| {
                entry.value().enabled && entry.value().node_id != relay.source_node_id
            })
            .map(|entry| entry.value().clone())
            .collect();
        if targets.is_empty() {
            continue;
        }

        let sends = targets.into_iter().map(|peer| {
            let state = state.clone();
            let relay = relay.clone();
            async move {
                let node_id = peer.node_id.clone();
                if let Err(err) = send_to_peer(&state, &peer, &relay).await {
                    tracing::debug!(peer = %node_id, "gossip send failed: {err}");
                }
            }
        });
        futures::future::join_all(sends).await;
        tracing::debug!(message = %relay.message_id, hops = relay.hops, "gossip hop sent");
    }
}

async fn send_to_peer<S>(
    state: &GossipState<S>,
    peer: &RemotePeer,
    relay: &GossipRelay,
) -> Result<(), SwarmError> {
    let mut client = SyncClient::new(ClientConfig {
        node_id: state.config.node_id.clone(),
        host: peer.host.clone(),
        port: peer.port,
        auth_token: state.config.auth_token.clone(),
        security: state.config.security,
        compression: state.config.compression,
    });
    client.connect().await?;
    client.push_gossip(relay).await?;
    client.disconnect().await;
    Ok(())
}

async fn sweep_seen<S>(state: Arc<GossipState<S>>) {
    let mut timer = interval(state.config.cleanup_interval);
    loop {
        timer.tick().await;
        let retention = state.config.seen_retention;
        let before = state.seen.len();
        state.seen.retain(|_, inserted| inserted.elapsed() < retention);
        let evicted = before.saturating_sub(state.seen.len());
        if evicted > 0 {
            tracing::debug!(evicted, "swept gossip seen set");
        }
    }
}

fn mint_message_id(node_id: &str) -> String {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}-{}-{}", node_id, now_ms, uuid::Uuid::new_v4().simple())
}
