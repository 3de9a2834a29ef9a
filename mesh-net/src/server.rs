//! The sync protocol listener.

use crate::auth::Authenticator;
use crate::channel::ChannelSecurity;
use crate::error::NetError;
use crate::session::{Session, SessionContext};
use docmesh_core::{HlcClock, MergePolicy};
use docmesh_store::DocumentStore;
use docmesh_types::GossipRelay;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Server-side knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// This node's id, returned in handshake responses.
    pub node_id: String,
    /// Whether connections run the key exchange prolog.
    pub security: ChannelSecurity,
    /// Whether brotli may be negotiated.
    pub compression: bool,
    /// Conflict resolution policy for pushed entries.
    pub policy: MergePolicy,
}

/// Accepts peer connections and serves pull/push sessions over them.
///
/// Each accepted connection gets its own task and its own channel;
/// a failing session never affects the listener or other sessions.
pub struct SyncServer<S> {
    config: ServerConfig,
    store: Arc<S>,
    clock: Arc<HlcClock>,
    authenticator: Arc<dyn Authenticator>,
    gossip_intake: Option<mpsc::UnboundedSender<GossipRelay>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> SyncServer<S>
where
    S: DocumentStore + 'static,
{
    /// Create a server over the given store and clock.
    pub fn new(
        config: ServerConfig,
        store: Arc<S>,
        clock: Arc<HlcClock>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            authenticator,
            gossip_intake: None,
            accept_task: Mutex::new(None),
        }
    }

    /// Route gossip-tagged pushes into the given intake instead of
    /// applying them directly.
    pub fn with_gossip_intake(mut self, intake: mpsc::UnboundedSender<GossipRelay>) -> Self {
        self.gossip_intake = Some(intake);
        self
    }

    /// Bind and start accepting. Returns the bound address, which is
    /// useful when the port was 0.
    pub async fn start(&self, addr: &str) -> Result<SocketAddr, NetError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "sync server listening");

        let ctx = Arc::new(SessionContext {
            node_id: self.config.node_id.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            authenticator: self.authenticator.clone(),
            policy: self.config.policy,
            security: self.config.security,
            compression: self.config.compression,
            gossip_intake: self.gossip_intake.clone(),
        });

        let task = tokio::spawn(accept_loop(listener, ctx));
        *self.accept_task.lock().await = Some(task);
        Ok(local_addr)
    }

    /// Stop accepting connections. Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
            tracing::info!("sync server stopped");
        }
    }
}

async fn accept_loop<S>(listener: TcpListener, ctx: Arc<SessionContext<S>>)
where
    S: DocumentStore + 'static,
{
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                tracing::debug!(%peer_addr, "connection accepted");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match Session::run(ctx, stream).await {
                        Ok(()) => tracing::debug!(%peer_addr, "connection closed"),
                        Err(err) => tracing::warn!(%peer_addr, "session ended: {err}"),
                    }
                });
            }
            Err(err) => {
                tracing::warn!("accept failed: {err}");
            }
        }
    }
}
