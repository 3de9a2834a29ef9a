//! # docmesh-swarm
//!
//! The background machinery that keeps a node converging with its
//! peers:
//! - [`SyncOrchestrator`] - periodic pulls from every known peer
//! - [`GossipService`] - epidemic fan-out of fresh writes
//! - [`UdpDiscovery`] - LAN peer observation via UDP broadcast
//! - [`LeaderElection`] - designates the cloud gateway among LAN peers
//! - [`PeerRegistry`] - the shared view of known peers

#![warn(clippy::all)]

mod discovery;
mod election;
mod error;
mod gossip;
mod orchestrator;
mod registry;

pub use discovery::{Discovery, DiscoveryConfig, PeerObservation, UdpDiscovery};
pub use election::{ElectionConfig, GatewayStatus, LeaderElection};
pub use error::SwarmError;
pub use gossip::{GossipConfig, GossipService};
pub use orchestrator::{OrchestratorConfig, SyncOrchestrator};
pub use registry::PeerRegistry;
