//! The outer frame codec.
//!
//! Wire format, little-endian length counting only the payload:
//!
//! ```text
//! +---------+---+---+-----------------+
//! |  len(4) | T | C |   payload(len)  |
//! +---------+---+---+-----------------+
//! ```
//!
//! `T` is the message type byte, `C` the compression flag.

use crate::error::{NetError, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size guard against hostile length prefixes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_SIZE: usize = 4 + 1 + 1;

/// One decoded outer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type byte.
    pub frame_type: u8,
    /// Compression flag.
    pub compression: u8,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame.
    pub fn new(frame_type: u8, compression: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            compression,
            payload,
        }
    }
}

/// Write one frame to the stream and flush it.
pub async fn write_frame<W>(stream: &mut W, frame: &Frame) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin + Send,
{
    if frame.payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: frame.payload.len(),
            limit: MAX_FRAME_SIZE,
        }
        .into());
    }

    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    header[4] = frame.frame_type;
    header[5] = frame.compression;

    stream.write_all(&header).await?;
    stream.write_all(&frame.payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame from the stream.
pub async fn read_frame<R>(stream: &mut R) -> Result<Frame, NetError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;

    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        }
        .into());
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    Ok(Frame {
        frame_type: header[4],
        compression: header[5],
        payload,
    })
}
