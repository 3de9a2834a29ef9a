//! # docmesh-node
//!
//! Composition of a full docmesh node: the store, the sync server, the
//! orchestrator, gossip, discovery and leader election wired together
//! under one [`Node`], configured from a TOML file.

#![warn(clippy::all)]

mod config;
mod node;

pub use config::{
    AuthSection, ChannelSection, Config, ConfigError, DiscoverySection, ElectionSection,
    GossipSection, MergePolicySetting, NodeSection, ServerSection, SyncSection,
};
pub use node::{Node, NodeError};
