//! LAN peer discovery over UDP broadcast.
//!
//! A discovery adapter surfaces `{node_id, host, port}` observations;
//! where they come from is its own business. The UDP adapter here
//! broadcasts this node's announcement on a fixed port and listens for
//! everyone else's, dropping datagrams that carry its own node id.

use crate::SwarmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// One sighting of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerObservation {
    /// The observed node's id.
    pub node_id: String,
    /// Address the peer's sync server is reachable at.
    pub host: String,
    /// Port of the peer's sync server.
    pub port: u16,
}

/// Source of peer observations.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Start observing; surfaced peers arrive on the returned channel.
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<PeerObservation>, SwarmError>;

    /// Stop observing and release the sockets. Safe to call more than
    /// once.
    async fn stop(&self);
}

/// UDP discovery knobs.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// This node's id; its own announcements are ignored.
    pub node_id: String,
    /// Host to advertise for the sync server.
    pub advertise_host: String,
    /// Port to advertise for the sync server.
    pub advertise_port: u16,
    /// UDP port announcements are broadcast on.
    pub broadcast_port: u16,
    /// Time between announcements.
    pub interval: Duration,
}

impl DiscoveryConfig {
    /// Defaults: announce every 5 s.
    pub fn new(node_id: impl Into<String>, advertise_host: impl Into<String>, advertise_port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            advertise_host: advertise_host.into(),
            advertise_port,
            broadcast_port: 4456,
            interval: Duration::from_secs(5),
        }
    }
}

/// Discovery over UDP broadcast datagrams.
pub struct UdpDiscovery {
    config: DiscoveryConfig,
    local_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpDiscovery {
    /// Create an adapter; sockets are bound by [`Discovery::start`].
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            local_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The bound listen address, known after start. Useful when the
    /// configured broadcast port was 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }
}

#[async_trait]
impl Discovery for UdpDiscovery {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<PeerObservation>, SwarmError> {
        let listener =
            Arc::new(UdpSocket::bind(("0.0.0.0", self.config.broadcast_port)).await?);
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);

        let announcer = UdpSocket::bind(("0.0.0.0", 0)).await?;
        announcer.set_broadcast(true)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = self.tasks.lock().await;

        let announcement = PeerObservation {
            node_id: self.config.node_id.clone(),
            host: self.config.advertise_host.clone(),
            port: self.config.advertise_port,
        };
        let announce_interval = self.config.interval;
        let broadcast_port = local_addr.port();
        tasks.push(tokio::spawn(async move {
            let payload = match rmp_serde::to_vec(&announcement) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!("failed to encode announcement: {err}");
                    return;
                }
            };
            let target = (Ipv4Addr::BROADCAST, broadcast_port);
            let mut timer = interval(announce_interval);
            loop {
                timer.tick().await;
                if let Err(err) = announcer.send_to(&payload, target).await {
                    tracing::debug!("announcement failed: {err}");
                }
            }
        }));

        let own_node_id = self.config.node_id.clone();
        tasks.push(tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let (len, from) = match listener.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(err) => {
                        tracing::warn!("discovery receive failed: {err}");
                        continue;
                    }
                };
                let observation: PeerObservation = match rmp_serde::from_slice(&buf[..len]) {
                    Ok(observation) => observation,
                    Err(err) => {
                        tracing::debug!(%from, "ignoring malformed announcement: {err}");
                        continue;
                    }
                };
                // Our own broadcasts come back around; they are noise.
                if observation.node_id == own_node_id {
                    continue;
                }
                tracing::debug!(
                    peer = %observation.node_id,
                    host = %observation.host,
                    port = observation.port,
                    "peer observed"
                );
                if tx.send(observation).is_err() {
                    return;
                }
            }
        }));

        tracing::info!(%local_addr, "discovery listening");
        Ok(rx)
    }

    async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        *self.local_addr.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(node_id: &str) -> DiscoveryConfig {
        let mut config = DiscoveryConfig::new(node_id, "127.0.0.1", 4455);
        // Ephemeral listen port keeps parallel tests apart.
        config.broadcast_port = 0;
        config.interval = Duration::from_millis(50);
        config
    }

    async fn send_announcement(to: SocketAddr, observation: &PeerObservation) {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let payload = rmp_serde::to_vec(observation).unwrap();
        socket.send_to(&payload, to).await.unwrap();
    }

    #[tokio::test]
    async fn observations_surface_on_the_channel() {
        let discovery = UdpDiscovery::new(test_config("self"));
        let mut rx = discovery.start().await.unwrap();
        let addr = discovery.local_addr().await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], addr.port()));

        let peer = PeerObservation {
            node_id: "other".into(),
            host: "192.168.1.7".into(),
            port: 4455,
        };
        send_announcement(target, &peer).await;

        let observed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(observed, peer);

        discovery.stop().await;
    }

    #[tokio::test]
    async fn own_announcements_are_ignored() {
        let discovery = UdpDiscovery::new(test_config("self"));
        let mut rx = discovery.start().await.unwrap();
        let addr = discovery.local_addr().await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], addr.port()));

        send_announcement(
            target,
            &PeerObservation {
                node_id: "self".into(),
                host: "127.0.0.1".into(),
                port: 4455,
            },
        )
        .await;
        send_announcement(
            target,
            &PeerObservation {
                node_id: "other".into(),
                host: "127.0.0.1".into(),
                port: 4456,
            },
        )
        .await;

        // Only the foreign announcement comes through.
        let observed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(observed.node_id, "other");

        discovery.stop().await;
    }

    #[tokio::test]
    async fn malformed_datagrams_are_skipped() {
        let discovery = UdpDiscovery::new(test_config("self"));
        let mut rx = discovery.start().await.unwrap();
        let addr = discovery.local_addr().await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], addr.port()));

        let socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        socket.send_to(&[0xFF, 0x01, 0x02], target).await.unwrap();

        send_announcement(
            target,
            &PeerObservation {
                node_id: "other".into(),
                host: "127.0.0.1".into(),
                port: 4455,
            },
        )
        .await;

        let observed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(observed.node_id, "other");

        discovery.stop().await;
    }

    #[tokio::test]
    async fn stop_releases_the_port() {
        let discovery = UdpDiscovery::new(test_config("self"));
        let _rx = discovery.start().await.unwrap();
        assert!(discovery.local_addr().await.is_some());

        discovery.stop().await;
        assert!(discovery.local_addr().await.is_none());
        // Stopping again is harmless.
        discovery.stop().await;
    }
}
