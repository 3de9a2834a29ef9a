//! Error taxonomy for the wire layer.

use docmesh_store::StoreError;
use docmesh_types::WireError;
use std::time::Duration;
use thiserror::Error;

/// Top-level error for network operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// Framing or message-shape violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Authentication failure.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A deadline elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Error surfaced verbatim from the store contract.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The endpoint is not connected.
    #[error("not connected")]
    NotConnected,
}

/// Framing and message-shape violations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame exceeded the size guard.
    #[error("frame too large: {size} bytes (max {limit})")]
    FrameTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum accepted size.
        limit: usize,
    },

    /// The handshake prolog carried an oversized key.
    #[error("handshake key too large: {0} bytes")]
    OversizedHandshakeKey(usize),

    /// Record encoding or decoding failed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A decrypted inner payload was too short to carry a frame header.
    #[error("inner payload too short: {0} bytes")]
    InnerTooShort(usize),

    /// An envelope frame arrived on a channel with no cipher state.
    #[error("received encrypted frame on a plaintext channel")]
    UnexpectedEnvelope,

    /// A message arrived that the session state does not allow.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// What the session was prepared to handle.
        expected: &'static str,
        /// What actually arrived.
        actual: String,
    },

    /// Decompression of a flagged payload failed.
    #[error("decompression failed: {0}")]
    Decompression(String),
}

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server rejected the application handshake.
    #[error("handshake rejected by server")]
    HandshakeRejected,

    /// The presented token did not match the cluster secret.
    #[error("auth token mismatch")]
    TokenMismatch,

    /// A record's HMAC tag did not verify.
    #[error("record authentication failed")]
    MacMismatch,

    /// An application message arrived before the handshake.
    #[error("session not authenticated: handshake required first")]
    NotAuthenticated,
}

/// Cryptographic failures.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The peer's public key failed to parse.
    #[error("invalid peer public key: {0}")]
    InvalidPublicKey(String),

    /// Key encoding failed locally.
    #[error("key encoding failed: {0}")]
    KeyEncoding(String),

    /// Ciphertext failed to decrypt (bad padding or truncation).
    #[error("decryption failed")]
    DecryptFailed,
}
