//! Composition of one docmesh node.

use crate::config::{Config, ConfigError};
use docmesh_core::{HlcClock, MergePolicy};
use docmesh_net::{
    ChannelSecurity, NetError, ServerConfig, SharedSecretAuthenticator, SyncServer,
};
use docmesh_store::{DocumentStore, StoreError};
use docmesh_swarm::{
    Discovery, DiscoveryConfig, ElectionConfig, GatewayStatus, GossipConfig, GossipService,
    LeaderElection, OrchestratorConfig, PeerRegistry, SwarmError, SyncOrchestrator, UdpDiscovery,
};
use docmesh_types::{
    Document, GossipRelay, HlcTimestamp, OplogEntry, PeerType, QueryNode, RemotePeer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Node-level error type.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Configuration problem.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Network failure.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// Background machinery failure.
    #[error("swarm error: {0}")]
    Swarm(#[from] SwarmError),

    /// A document payload failed to encode or decode.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A full docmesh node: local store plus the replication machinery.
///
/// Local writes go through [`put`](Self::put) and
/// [`delete`](Self::delete), which stamp the clock, persist atomically
/// with the oplog, and hand fresh entries to gossip. Remote changes
/// arrive through the sync server and the orchestrator's pull rounds.
pub struct Node<S> {
    config: Config,
    store: Arc<S>,
    clock: Arc<HlcClock>,
    registry: Arc<PeerRegistry>,
    server: SyncServer<S>,
    orchestrator: Arc<SyncOrchestrator<S>>,
    gossip: Arc<GossipService<S>>,
    election: LeaderElection,
    discovery: Mutex<Option<UdpDiscovery>>,
    gossip_intake: Mutex<Option<mpsc::UnboundedReceiver<GossipRelay>>>,
    pump_task: Mutex<Option<JoinHandle<()>>>,
    listen_addr: Mutex<Option<SocketAddr>>,
}

impl<S> Node<S>
where
    S: DocumentStore + 'static,
{
    /// Wire a node together from its configuration and store.
    pub fn new(config: Config, store: Arc<S>) -> Self {
        let node_id = config.node.id.clone();
        let clock = Arc::new(HlcClock::new(node_id.clone()));
        let registry = Arc::new(PeerRegistry::new());
        let authenticator = Arc::new(SharedSecretAuthenticator::new(
            config.auth.shared_secret.clone(),
        ));
        let security = if config.channel.encryption {
            ChannelSecurity::Encrypted
        } else {
            ChannelSecurity::Plaintext
        };
        let policy = MergePolicy::from(config.sync.merge_policy);

        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let mut server = SyncServer::new(
            ServerConfig {
                node_id: node_id.clone(),
                security,
                compression: config.channel.compression,
                policy,
            },
            store.clone(),
            clock.clone(),
            authenticator,
        );
        if config.gossip.enabled {
            server = server.with_gossip_intake(intake_tx);
        }

        let orchestrator = Arc::new(SyncOrchestrator::new(
            OrchestratorConfig {
                node_id: node_id.clone(),
                auth_token: config.auth.shared_secret.clone(),
                sync_interval: config.sync_interval(),
                batch_size: config.sync.batch_size,
                security,
                compression: config.channel.compression,
                policy,
            },
            store.clone(),
            clock.clone(),
        ));

        let mut gossip_config = GossipConfig::new(node_id.clone(), config.auth.shared_secret.clone());
        gossip_config.max_hops = config.gossip.max_hops;
        gossip_config.send_delay = config.gossip_send_delay();
        gossip_config.security = security;
        gossip_config.compression = config.channel.compression;
        gossip_config.policy = policy;
        let gossip = Arc::new(GossipService::new(
            gossip_config,
            store.clone(),
            clock.clone(),
        ));

        let mut election_config = ElectionConfig::new(node_id);
        election_config.interval = config.election_interval();
        let election = LeaderElection::new(election_config, registry.clone());

        Self {
            config,
            store,
            clock,
            registry,
            server,
            orchestrator,
            gossip,
            election,
            discovery: Mutex::new(None),
            gossip_intake: Mutex::new(Some(intake_rx)),
            pump_task: Mutex::new(None),
            listen_addr: Mutex::new(None),
        }
    }

    /// Start every component. Returns the sync server's bound address.
    pub async fn start(&self) -> Result<SocketAddr, NodeError> {
        self.store.initialize().await?;

        let bind = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        let addr = self.server.start(&bind).await?;
        *self.listen_addr.lock().await = Some(addr);

        if self.config.gossip.enabled {
            let intake = self.gossip_intake.lock().await.take();
            self.gossip.start(intake).await;
        }
        self.orchestrator.start().await;
        self.election.start().await;

        if self.config.discovery.enabled {
            let mut discovery_config = DiscoveryConfig::new(
                self.config.node.id.clone(),
                self.config.discovery.advertise_host.clone(),
                addr.port(),
            );
            discovery_config.broadcast_port = self.config.discovery.broadcast_port;
            discovery_config.interval = self.config.discovery_interval();
            let discovery = UdpDiscovery::new(discovery_config);
            let observations = discovery.start().await?;
            *self.discovery.lock().await = Some(discovery);
            *self.pump_task.lock().await = Some(self.spawn_observation_pump(observations));
        }

        tracing::info!(node = %self.config.node.id, %addr, "node started");
        Ok(addr)
    }

    /// Stop every component. Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(discovery) = self.discovery.lock().await.take() {
            discovery.stop().await;
        }
        if let Some(task) = self.pump_task.lock().await.take() {
            task.abort();
        }
        self.gossip.stop().await;
        self.orchestrator.stop().await;
        self.election.stop().await;
        self.server.stop().await;
        if let Err(err) = self.store.close().await {
            tracing::debug!("store close: {err}");
        }
        tracing::info!(node = %self.config.node.id, "node stopped");
    }

    /// Write a JSON document locally and announce it to the cluster.
    pub async fn put(
        &self,
        collection: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<HlcTimestamp, NodeError> {
        let timestamp = self.clock.now();
        let data = serde_json::to_vec(value)?;
        self.store
            .put_document(Document::new(collection, key, data.clone(), timestamp.clone()))
            .await?;
        if self.config.gossip.enabled {
            self.gossip
                .propagate(vec![OplogEntry::put(collection, key, data, timestamp.clone())]);
        }
        Ok(timestamp)
    }

    /// Delete a document locally and announce the tombstone.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<HlcTimestamp, NodeError> {
        let timestamp = self.clock.now();
        self.store
            .delete_document(collection, key, timestamp.clone())
            .await?;
        if self.config.gossip.enabled {
            self.gossip
                .propagate(vec![OplogEntry::delete(collection, key, timestamp.clone())]);
        }
        Ok(timestamp)
    }

    /// Read a document's JSON payload. Tombstones read as `None`.
    pub async fn get(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, NodeError> {
        match self.store.get_document(collection, key).await? {
            Some(doc) if !doc.tombstone => Ok(Some(doc.json()?)),
            _ => Ok(None),
        }
    }

    /// Query live documents in a collection.
    pub async fn find(
        &self,
        collection: &str,
        query: &QueryNode,
    ) -> Result<Vec<Document>, NodeError> {
        Ok(self.store.find_documents(collection, query).await?)
    }

    /// Register a peer with every component that talks to peers.
    pub async fn add_peer(&self, peer: RemotePeer) -> Result<(), NodeError> {
        self.registry.upsert(peer.clone());
        self.orchestrator.add_peer(peer.clone());
        self.gossip.add_peer(peer.clone());
        self.store.save_remote_peer(peer).await?;
        Ok(())
    }

    /// Run one pull round immediately instead of waiting for the timer.
    pub async fn sync_now(&self) {
        self.orchestrator.sync_once().await;
    }

    /// This node's id.
    pub fn node_id(&self) -> &str {
        &self.config.node.id
    }

    /// The clock shared by every component of this node.
    pub fn clock(&self) -> &Arc<HlcClock> {
        &self.clock
    }

    /// The sync server's bound address, known after start.
    pub async fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.lock().await
    }

    /// The latest gateway election outcome.
    pub fn gateway(&self) -> GatewayStatus {
        self.election.current()
    }

    /// Subscribe to gateway changes.
    pub fn subscribe_gateway(&self) -> watch::Receiver<GatewayStatus> {
        self.election.subscribe()
    }

    fn spawn_observation_pump(
        &self,
        mut observations: mpsc::UnboundedReceiver<docmesh_swarm::PeerObservation>,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let store = self.store.clone();
        let orchestrator = self.orchestrator.clone();
        let gossip = self.gossip.clone();
        tokio::spawn(async move {
            while let Some(observation) = observations.recv().await {
                let peer = RemotePeer {
                    node_id: observation.node_id,
                    host: observation.host,
                    port: observation.port,
                    peer_type: PeerType::LanDiscovered,
                    last_seen: unix_ms(),
                    enabled: true,
                };
                registry.upsert(peer.clone());
                orchestrator.add_peer(peer.clone());
                gossip.add_peer(peer.clone());
                if let Err(err) = store.save_remote_peer(peer).await {
                    tracing::warn!("failed to persist discovered peer: {err}");
                }
            }
        })
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
