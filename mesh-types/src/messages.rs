//! Protocol records exchanged between peers.
//!
//! Every record is MessagePack-encoded with positional fields, so field
//! order is the wire contract and must not change. The outer frame
//! carries the message type as a single byte; [`MessageType`] maps those
//! bytes to records.

use crate::{HlcTimestamp, Operation, OplogEntry, WireError};
use serde::{Deserialize, Serialize};

/// Compression label negotiated during the application handshake.
pub const COMPRESSION_BROTLI: &str = "brotli";

/// Outer-frame message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client-initiated application handshake.
    HandshakeRequest = 1,
    /// Server reply to the handshake.
    HandshakeResponse = 2,
    /// Request for oplog entries after a timestamp.
    PullChangesRequest = 5,
    /// Batch of oplog entries answering a pull.
    ChangeSetResponse = 6,
    /// Batch of oplog entries pushed to a peer.
    PushChangesRequest = 7,
    /// Acknowledgement of a push.
    AckResponse = 8,
    /// Authenticated-encrypted wrapper around an inner frame.
    SecureEnvelope = 9,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::HandshakeRequest),
            2 => Ok(MessageType::HandshakeResponse),
            5 => Ok(MessageType::PullChangesRequest),
            6 => Ok(MessageType::ChangeSetResponse),
            7 => Ok(MessageType::PushChangesRequest),
            8 => Ok(MessageType::AckResponse),
            9 => Ok(MessageType::SecureEnvelope),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

/// Application handshake sent by the client after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// The connecting node's id.
    pub node_id: String,
    /// Shared cluster secret.
    pub auth_token: String,
    /// Compression codecs the client can use (e.g. `"brotli"`).
    pub supported_compression: Vec<String>,
}

/// Server reply to a [`HandshakeRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Whether the handshake was accepted.
    pub accepted: bool,
    /// The server's node id.
    pub server_node_id: String,
    /// Compression codec selected for the session, if any.
    pub selected_compression: Option<String>,
}

/// An oplog entry in transit, with the timestamp flattened into three
/// fields and the payload carried as UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireOplogEntry {
    /// Collection of the affected document.
    pub collection: String,
    /// Key of the affected document.
    pub key: String,
    /// JSON payload as text; empty for deletes.
    pub json_data: String,
    /// Wall-time component of the timestamp, in decimal text.
    pub hlc_wall: String,
    /// Logical counter of the timestamp.
    pub hlc_logic: u32,
    /// Node id of the timestamp.
    pub hlc_node: String,
    /// `"put"` or `"delete"`.
    pub operation: String,
}

impl WireOplogEntry {
    /// Flatten a domain entry for transmission.
    pub fn from_entry(entry: &OplogEntry) -> Self {
        Self {
            collection: entry.collection.clone(),
            key: entry.key.clone(),
            json_data: String::from_utf8_lossy(&entry.data).into_owned(),
            hlc_wall: entry.timestamp.wall_time.to_string(),
            hlc_logic: entry.timestamp.logical,
            hlc_node: entry.timestamp.node_id.clone(),
            operation: entry.operation.as_str().to_string(),
        }
    }

    /// Reassemble the domain entry.
    pub fn into_entry(self) -> Result<OplogEntry, WireError> {
        let wall = self
            .hlc_wall
            .parse::<u64>()
            .map_err(|_| WireError::InvalidTimestamp(self.hlc_wall.clone()))?;
        let operation =
            Operation::parse(&self.operation).ok_or(WireError::InvalidOperation(self.operation))?;
        Ok(OplogEntry {
            collection: self.collection,
            key: self.key,
            data: self.json_data.into_bytes(),
            timestamp: HlcTimestamp::new(wall, self.hlc_logic, self.hlc_node),
            operation,
        })
    }
}

/// Request for oplog entries strictly after the given timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullChangesRequest {
    /// Wall-time component of the cursor, in decimal text.
    pub since_wall: String,
    /// Logical counter of the cursor.
    pub since_logic: u32,
    /// Node id of the cursor.
    pub since_node: String,
}

impl PullChangesRequest {
    /// Build a request from a cursor timestamp.
    pub fn since(ts: &HlcTimestamp) -> Self {
        Self {
            since_wall: ts.wall_time.to_string(),
            since_logic: ts.logical,
            since_node: ts.node_id.clone(),
        }
    }

    /// Reassemble the cursor timestamp.
    pub fn timestamp(&self) -> Result<HlcTimestamp, WireError> {
        let wall = self
            .since_wall
            .parse::<u64>()
            .map_err(|_| WireError::InvalidTimestamp(self.since_wall.clone()))?;
        Ok(HlcTimestamp::new(
            wall,
            self.since_logic,
            self.since_node.clone(),
        ))
    }
}

/// Batch of oplog entries answering a [`PullChangesRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetResponse {
    /// Entries strictly after the requested cursor, ascending.
    pub entries: Vec<WireOplogEntry>,
    /// True when the batch was filled to capacity and more may follow.
    pub has_more: bool,
}

/// Batch of oplog entries pushed to a peer.
///
/// A direct push leaves the gossip fields unset. A gossip fan-out sets
/// all three so the receiver can deduplicate and bound propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushChangesRequest {
    /// The pushed entries.
    pub entries: Vec<WireOplogEntry>,
    /// Originating node of a gossip message.
    pub source_node_id: Option<String>,
    /// Unique id of a gossip message, for duplicate suppression.
    pub message_id: Option<String>,
    /// Hop count of a gossip message.
    pub hops: u32,
}

/// Acknowledgement of a [`PushChangesRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Whether the batch was applied.
    pub success: bool,
}

/// The payload of an outer type-9 frame: an authenticated-encrypted
/// inner frame.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureEnvelope {
    /// AES-256-CBC ciphertext of `[type, compression, payload...]`.
    pub ciphertext: Vec<u8>,
    /// Random initialization vector.
    pub iv: [u8; 16],
    /// HMAC-SHA-256 over `iv || ciphertext`.
    pub tag: [u8; 32],
}

impl SecureEnvelope {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Encode)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Decode)
    }
}

impl std::fmt::Debug for SecureEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureEnvelope")
            .field("ciphertext", &format!("[{} bytes]", self.ciphertext.len()))
            .field("iv", &"[16 bytes]")
            .field("tag", &"[32 bytes]")
            .finish()
    }
}

/// A gossip message extracted from a push that carried gossip metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipRelay {
    /// The relayed entries.
    pub entries: Vec<OplogEntry>,
    /// The node that originated the message.
    pub source_node_id: String,
    /// Unique message id for duplicate suppression.
    pub message_id: String,
    /// Hops taken so far.
    pub hops: u32,
}

/// A decoded application message, dispatched on the outer frame type.
///
/// [`SecureEnvelope`] is not a member: the envelope is opened by the
/// channel layer before decoding reaches this level.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// See [`HandshakeRequest`].
    HandshakeRequest(HandshakeRequest),
    /// See [`HandshakeResponse`].
    HandshakeResponse(HandshakeResponse),
    /// See [`PullChangesRequest`].
    PullChanges(PullChangesRequest),
    /// See [`ChangeSetResponse`].
    ChangeSet(ChangeSetResponse),
    /// See [`PushChangesRequest`].
    PushChanges(PushChangesRequest),
    /// See [`AckResponse`].
    Ack(AckResponse),
}

impl Message {
    /// The outer-frame type byte for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::HandshakeRequest(_) => MessageType::HandshakeRequest,
            Message::HandshakeResponse(_) => MessageType::HandshakeResponse,
            Message::PullChanges(_) => MessageType::PullChangesRequest,
            Message::ChangeSet(_) => MessageType::ChangeSetResponse,
            Message::PushChanges(_) => MessageType::PushChangesRequest,
            Message::Ack(_) => MessageType::AckResponse,
        }
    }

    /// Serialize the record to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let encoded = match self {
            Message::HandshakeRequest(m) => rmp_serde::to_vec(m),
            Message::HandshakeResponse(m) => rmp_serde::to_vec(m),
            Message::PullChanges(m) => rmp_serde::to_vec(m),
            Message::ChangeSet(m) => rmp_serde::to_vec(m),
            Message::PushChanges(m) => rmp_serde::to_vec(m),
            Message::Ack(m) => rmp_serde::to_vec(m),
        };
        encoded.map_err(WireError::Encode)
    }

    /// Decode a record from its outer-frame type byte and payload.
    pub fn decode(frame_type: u8, payload: &[u8]) -> Result<Self, WireError> {
        match MessageType::try_from(frame_type)? {
            MessageType::HandshakeRequest => {
                rmp_serde::from_slice(payload).map(Message::HandshakeRequest)
            }
            MessageType::HandshakeResponse => {
                rmp_serde::from_slice(payload).map(Message::HandshakeResponse)
            }
            MessageType::PullChangesRequest => {
                rmp_serde::from_slice(payload).map(Message::PullChanges)
            }
            MessageType::ChangeSetResponse => rmp_serde::from_slice(payload).map(Message::ChangeSet),
            MessageType::PushChangesRequest => {
                rmp_serde::from_slice(payload).map(Message::PushChanges)
            }
            MessageType::AckResponse => rmp_serde::from_slice(payload).map(Message::Ack),
            // Envelopes are a channel-layer concern, never decoded here.
            MessageType::SecureEnvelope => return Err(WireError::UnknownMessageType(frame_type)),
        }
        .map_err(WireError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> OplogEntry {
        OplogEntry::put(
            "users",
            "alice",
            br#"{"name":"Alice","age":30}"#.to_vec(),
            HlcTimestamp::new(100, 0, "node-a"),
        )
    }

    #[test]
    fn message_type_roundtrip() {
        for val in [1u8, 2, 5, 6, 7, 8, 9] {
            let mt = MessageType::try_from(val).unwrap();
            assert_eq!(mt as u8, val);
        }
    }

    #[test]
    fn unassigned_message_types_fail() {
        for val in [0u8, 3, 4, 10, 255] {
            assert!(MessageType::try_from(val).is_err());
        }
    }

    #[test]
    fn wire_entry_flattens_timestamp() {
        let wire = WireOplogEntry::from_entry(&sample_entry());
        assert_eq!(wire.hlc_wall, "100");
        assert_eq!(wire.hlc_logic, 0);
        assert_eq!(wire.hlc_node, "node-a");
        assert_eq!(wire.operation, "put");

        let entry = wire.into_entry().unwrap();
        assert_eq!(entry, sample_entry());
    }

    #[test]
    fn wire_entry_rejects_bad_wall_time() {
        let mut wire = WireOplogEntry::from_entry(&sample_entry());
        wire.hlc_wall = "not-a-number".into();
        assert!(matches!(
            wire.into_entry(),
            Err(WireError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn wire_entry_rejects_bad_operation() {
        let mut wire = WireOplogEntry::from_entry(&sample_entry());
        wire.operation = "merge".into();
        assert!(matches!(
            wire.into_entry(),
            Err(WireError::InvalidOperation(_))
        ));
    }

    #[test]
    fn pull_request_roundtrips_cursor() {
        let ts = HlcTimestamp::new(1705000000123, 4, "node-b");
        let req = PullChangesRequest::since(&ts);
        assert_eq!(req.timestamp().unwrap(), ts);
    }

    #[test]
    fn handshake_roundtrip() {
        let msg = Message::HandshakeRequest(HandshakeRequest {
            node_id: "node-a".into(),
            auth_token: "secret".into(),
            supported_compression: vec![COMPRESSION_BROTLI.into()],
        });
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::decode(msg.message_type() as u8, &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn change_set_roundtrip() {
        let msg = Message::ChangeSet(ChangeSetResponse {
            entries: vec![WireOplogEntry::from_entry(&sample_entry())],
            has_more: true,
        });
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::decode(6, &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn push_with_gossip_metadata_roundtrip() {
        let msg = Message::PushChanges(PushChangesRequest {
            entries: vec![WireOplogEntry::from_entry(&sample_entry())],
            source_node_id: Some("node-a".into()),
            message_id: Some("node-a-1705000000000-f00".into()),
            hops: 2,
        });
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::decode(7, &bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn envelope_payload_is_not_an_application_message() {
        assert!(Message::decode(9, &[]).is_err());
    }

    #[test]
    fn envelope_roundtrip() {
        let env = SecureEnvelope {
            ciphertext: vec![1, 2, 3, 4],
            iv: [7u8; 16],
            tag: [9u8; 32],
        };
        let restored = SecureEnvelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, env);
    }

    #[test]
    fn envelope_debug_hides_contents() {
        let env = SecureEnvelope {
            ciphertext: vec![0xAB; 8],
            iv: [0xCD; 16],
            tag: [0xEF; 32],
        };
        let debug = format!("{:?}", env);
        assert!(debug.contains("[8 bytes]"));
        assert!(!debug.contains("171"));
    }
}
