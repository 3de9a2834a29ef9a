//! # docmesh-types
//!
//! Model and wire types for the docmesh peer-to-peer document database:
//! - [`HlcTimestamp`] - hybrid logical clock timestamps and their total order
//! - [`Document`], [`OplogEntry`], [`RemotePeer`] - the replicated data model
//! - [`QueryNode`] - the typed query tree evaluated against JSON documents
//! - [`Message`] and friends - protocol records exchanged between peers
//! - [`WireError`] - encoding/decoding error type

#![warn(missing_docs)]
#![warn(clippy::all)]

mod document;
mod error;
mod hlc;
mod messages;
mod query;

pub use document::{Document, Operation, OplogEntry, PeerType, RemotePeer};
pub use error::WireError;
pub use hlc::{HlcTimestamp, TimestampParseError};
pub use messages::{
    AckResponse, ChangeSetResponse, GossipRelay, HandshakeRequest, HandshakeResponse, Message,
    MessageType, PullChangesRequest, PushChangesRequest, SecureEnvelope, WireOplogEntry,
    COMPRESSION_BROTLI,
};
pub use query::{matches_document, QueryNode};
