//! # docmesh-net
//!
//! The peer-to-peer wire layer of docmesh:
//! - [`frame`] - the outer frame codec
//! - [`compress`] - Brotli payload compression
//! - [`crypto`] - ECDH key agreement and authenticated record encryption
//! - [`channel`] - the secure channel combining the three layers
//! - [`auth`] - application-handshake token validation
//! - [`server`] / [`client`] - the sync protocol endpoints
//! - [`apply`] - feeding received oplog entries through the resolver

#![warn(clippy::all)]

pub mod apply;
pub mod auth;
pub mod channel;
pub mod client;
pub mod compress;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod server;
mod session;

pub use auth::{Authenticator, SharedSecretAuthenticator};
pub use channel::{ChannelSecurity, SecureChannel};
pub use client::{ClientConfig, SyncClient};
pub use error::{AuthError, CryptoError, NetError, ProtocolError};
pub use server::{ServerConfig, SyncServer};

/// Deadline for every request/response exchange and for the key
/// exchange prolog.
pub const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Largest batch of oplog entries served per pull.
pub const PULL_BATCH_LIMIT: usize = 100;
