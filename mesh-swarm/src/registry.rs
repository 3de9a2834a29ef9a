//! Shared registry of known peers.

use dashmap::DashMap;
use docmesh_types::{PeerType, RemotePeer};

/// Concurrent map of known peers, keyed by node id.
///
/// Discovery writes into it, leader election and the node shell read
/// from it. Cloning is cheap on the callers' side because the registry
/// is always shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, RemotePeer>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer, keyed by its node id.
    pub fn upsert(&self, peer: RemotePeer) {
        self.peers.insert(peer.node_id.clone(), peer);
    }

    /// Fetch one peer by node id.
    pub fn get(&self, node_id: &str) -> Option<RemotePeer> {
        self.peers.get(node_id).map(|entry| entry.value().clone())
    }

    /// Remove a peer by node id.
    pub fn remove(&self, node_id: &str) {
        self.peers.remove(node_id);
    }

    /// All known peers.
    pub fn all(&self) -> Vec<RemotePeer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Enabled peers discovered on the local network.
    pub fn lan_peers(&self) -> Vec<RemotePeer> {
        self.peers
            .iter()
            .filter(|entry| {
                entry.value().enabled && entry.value().peer_type == PeerType::LanDiscovered
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(node_id: &str, peer_type: PeerType, last_seen: u64) -> RemotePeer {
        RemotePeer {
            node_id: node_id.into(),
            host: "10.0.0.1".into(),
            port: 4455,
            peer_type,
            last_seen,
            enabled: true,
        }
    }

    #[test]
    fn upsert_replaces_by_node_id() {
        let registry = PeerRegistry::new();
        registry.upsert(peer("a", PeerType::LanDiscovered, 1));
        registry.upsert(peer("a", PeerType::LanDiscovered, 2));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().last_seen, 2);
    }

    #[test]
    fn lan_peers_filters_type_and_enabled() {
        let registry = PeerRegistry::new();
        registry.upsert(peer("lan", PeerType::LanDiscovered, 1));
        registry.upsert(peer("static", PeerType::StaticRemote, 1));
        let mut disabled = peer("off", PeerType::LanDiscovered, 1);
        disabled.enabled = false;
        registry.upsert(disabled);

        let lan = registry.lan_peers();
        assert_eq!(lan.len(), 1);
        assert_eq!(lan[0].node_id, "lan");
    }

    #[test]
    fn remove_forgets_the_peer() {
        let registry = PeerRegistry::new();
        registry.upsert(peer("a", PeerType::LanDiscovered, 1));
        registry.remove("a");
        assert!(registry.is_empty());
    }
}
