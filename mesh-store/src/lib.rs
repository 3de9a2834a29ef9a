//! # docmesh-store
//!
//! The storage contract every docmesh node is built against, plus an
//! in-memory reference implementation. Durable backends (an embedded
//! SQL engine, a log-structured store) live outside this workspace and
//! implement [`DocumentStore`]; the replication machinery only ever
//! talks to the trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use docmesh_types::{Document, HlcTimestamp, OplogEntry, QueryNode, RemotePeer};
use thiserror::Error;

/// Storage layer errors, surfaced verbatim through the sync stack.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed an operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored payload could not be parsed as JSON.
    #[error("stored payload is not valid json: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The store was used after `close`.
    #[error("store is closed")]
    Closed,
}

/// The durable state a node owns: documents, the oplog, and the
/// registry of known remote peers.
///
/// Implementations must be safe for concurrent calls, and must keep a
/// document upsert and its oplog append atomic: neither
/// [`put_document`](Self::put_document) nor
/// [`apply_batch`](Self::apply_batch) may expose one without the other.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Prepare the store for use.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Release resources. Subsequent calls fail with [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;

    /// The highest document timestamp, or the zero stamp when empty.
    async fn latest_timestamp(&self) -> Result<HlcTimestamp, StoreError>;

    /// Fetch one document by identity. Tombstones are returned as-is.
    async fn get_document(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Document>, StoreError>;

    /// Upsert a document and append the matching oplog entry atomically.
    async fn put_document(&self, doc: Document) -> Result<(), StoreError>;

    /// Replace the document with a tombstone and append a delete entry
    /// atomically.
    async fn delete_document(
        &self,
        collection: &str,
        key: &str,
        timestamp: HlcTimestamp,
    ) -> Result<(), StoreError>;

    /// Oplog entries strictly after `since`, ascending, at most `limit`.
    async fn oplog_after(
        &self,
        since: &HlcTimestamp,
        limit: usize,
    ) -> Result<Vec<OplogEntry>, StoreError>;

    /// Apply a resolved batch: all documents upserted and all oplog
    /// entries appended, atomically. A failure rejects the whole batch.
    async fn apply_batch(
        &self,
        docs: Vec<Document>,
        oplog: Vec<OplogEntry>,
    ) -> Result<(), StoreError>;

    /// Names of all known collections.
    async fn collections(&self) -> Result<Vec<String>, StoreError>;

    /// Live documents in `collection` matching `query`.
    async fn find_documents(
        &self,
        collection: &str,
        query: &QueryNode,
    ) -> Result<Vec<Document>, StoreError>;

    /// All registered remote peers.
    async fn remote_peers(&self) -> Result<Vec<RemotePeer>, StoreError>;

    /// Insert or update a peer, keyed by node id.
    async fn save_remote_peer(&self, peer: RemotePeer) -> Result<(), StoreError>;

    /// Remove a peer by node id.
    async fn remove_remote_peer(&self, node_id: &str) -> Result<(), StoreError>;
}
