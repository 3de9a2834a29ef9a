//! Swarm-level error type.

use docmesh_net::NetError;
use docmesh_store::StoreError;
use thiserror::Error;

/// Errors from the background sync machinery.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// A network operation failed.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// A store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A socket operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
