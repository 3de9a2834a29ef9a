//! Wire encoding error type.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol records.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack encoding failed.
    #[error("encoding failed: {0}")]
    Encode(#[source] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("decoding failed: {0}")]
    Decode(#[source] rmp_serde::decode::Error),

    /// Unknown outer-frame message type byte.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// A flattened timestamp field could not be reassembled.
    #[error("invalid timestamp field: {0}")]
    InvalidTimestamp(String),

    /// An operation field was neither `put` nor `delete`.
    #[error("invalid operation: {0:?}")]
    InvalidOperation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::UnknownMessageType(42);
        assert_eq!(err.to_string(), "unknown message type: 42");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
