//! The replicated data model: documents, oplog entries and known peers.

use crate::HlcTimestamp;
use serde::{Deserialize, Serialize};

/// The kind of write an oplog entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// A document upsert.
    Put,
    /// A document deletion (produces a tombstone).
    Delete,
}

impl Operation {
    /// The wire spelling of this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Put => "put",
            Operation::Delete => "delete",
        }
    }

    /// Parse the wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "put" => Some(Operation::Put),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// A JSON document stored in a named collection.
///
/// Identity is `(collection, key)`; there is at most one document per
/// identity. `data` holds the UTF-8 JSON payload, or is empty when the
/// document is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Collection the document belongs to.
    pub collection: String,
    /// Key within the collection.
    pub key: String,
    /// UTF-8 JSON payload; empty for tombstones.
    pub data: Vec<u8>,
    /// Timestamp of the write that produced this state.
    pub timestamp: HlcTimestamp,
    /// True when the document has been deleted.
    pub tombstone: bool,
}

impl Document {
    /// Create a live document from a JSON payload.
    pub fn new(
        collection: impl Into<String>,
        key: impl Into<String>,
        data: Vec<u8>,
        timestamp: HlcTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data,
            timestamp,
            tombstone: false,
        }
    }

    /// Create a tombstone marking `(collection, key)` as deleted.
    pub fn tombstone(
        collection: impl Into<String>,
        key: impl Into<String>,
        timestamp: HlcTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data: Vec::new(),
            timestamp,
            tombstone: true,
        }
    }

    /// Parse the payload as JSON. Tombstones have no payload.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

/// An append-only record of one write.
///
/// Oplog entries are never mutated; they are the unit of replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Collection of the affected document.
    pub collection: String,
    /// Key of the affected document.
    pub key: String,
    /// UTF-8 JSON payload; empty for deletes.
    pub data: Vec<u8>,
    /// Timestamp of the write.
    pub timestamp: HlcTimestamp,
    /// Whether the write was a put or a delete.
    pub operation: Operation,
}

impl OplogEntry {
    /// Record a put of `data` at `timestamp`.
    pub fn put(
        collection: impl Into<String>,
        key: impl Into<String>,
        data: Vec<u8>,
        timestamp: HlcTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data,
            timestamp,
            operation: Operation::Put,
        }
    }

    /// Record a delete at `timestamp`.
    pub fn delete(
        collection: impl Into<String>,
        key: impl Into<String>,
        timestamp: HlcTimestamp,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            data: Vec::new(),
            timestamp,
            operation: Operation::Delete,
        }
    }

    /// True when this entry records a deletion.
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }
}

/// How a remote peer became known to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerType {
    /// Observed via LAN broadcast discovery.
    LanDiscovered,
    /// Configured statically.
    StaticRemote,
    /// A cloud-hosted peer.
    CloudRemote,
}

/// A peer this node can synchronize with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePeer {
    /// The peer's node id.
    pub node_id: String,
    /// Hostname or IP address.
    pub host: String,
    /// Sync protocol port.
    pub port: u16,
    /// How the peer was learned.
    pub peer_type: PeerType,
    /// Unix milliseconds of the last observation.
    pub last_seen: u64,
    /// Disabled peers are kept but not contacted.
    pub enabled: bool,
}
