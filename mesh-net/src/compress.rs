//! Brotli payload compression.
//!
//! Payloads above [`COMPRESSION_THRESHOLD`] are compressed at
//! [`BROTLI_QUALITY`] when the session negotiated brotli; the flag is
//! set only when compression actually shrank the payload.

use crate::error::{NetError, ProtocolError};
use std::borrow::Cow;
use std::io::Write;

/// Payloads at or below this size are sent as-is.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Brotli quality level; favors speed over ratio.
pub const BROTLI_QUALITY: u32 = 4;

/// Brotli window size (log2).
const BROTLI_LGWIN: u32 = 22;

/// Compression flag: payload is raw.
pub const FLAG_NONE: u8 = 0;

/// Compression flag: payload is brotli-compressed.
pub const FLAG_BROTLI: u8 = 1;

/// Compress `data` with brotli.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, NetError> {
    let mut out = Vec::new();
    let mut writer = brotli::CompressorWriter::new(&mut out, 4096, BROTLI_QUALITY, BROTLI_LGWIN);
    writer.write_all(data)?;
    drop(writer);
    Ok(out)
}

/// Decompress a brotli payload.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, NetError> {
    let mut out = Vec::new();
    brotli::BrotliDecompress(&mut std::io::Cursor::new(data), &mut out)
        .map_err(|e| ProtocolError::Decompression(e.to_string()))?;
    Ok(out)
}

/// Apply the compression policy to an outgoing payload.
///
/// Returns the bytes to send and the compression flag.
pub fn maybe_compress(payload: &[u8], negotiated: bool) -> Result<(Cow<'_, [u8]>, u8), NetError> {
    if !negotiated || payload.len() <= COMPRESSION_THRESHOLD {
        return Ok((Cow::Borrowed(payload), FLAG_NONE));
    }
    let compressed = compress(payload)?;
    if compressed.len() < payload.len() {
        Ok((Cow::Owned(compressed), FLAG_BROTLI))
    } else {
        Ok((Cow::Borrowed(payload), FLAG_NONE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_decompress_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn small_payloads_are_never_compressed() {
        let data = vec![0u8; COMPRESSION_THRESHOLD];
        let (out, flag) = maybe_compress(&data, true).unwrap();
        assert_eq!(flag, FLAG_NONE);
        assert_eq!(out.as_ref(), data.as_slice());
    }

    #[test]
    fn compressible_payloads_above_threshold_are_flagged() {
        let data = b"abcd".repeat(1000);
        let (out, flag) = maybe_compress(&data, true).unwrap();
        assert_eq!(flag, FLAG_BROTLI);
        assert!(out.len() < data.len());
        assert_eq!(decompress(&out).unwrap(), data);
    }

    #[test]
    fn incompressible_payloads_stay_raw() {
        // A pseudo-random buffer that brotli cannot shrink.
        let mut state = 0x12345678u32;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();
        let (out, flag) = maybe_compress(&data, true).unwrap();
        assert_eq!(flag, FLAG_NONE);
        assert_eq!(out.as_ref(), data.as_slice());
    }

    #[test]
    fn compression_disabled_when_not_negotiated() {
        let data = b"abcd".repeat(1000);
        let (_, flag) = maybe_compress(&data, false).unwrap();
        assert_eq!(flag, FLAG_NONE);
    }

    #[test]
    fn garbage_decompression_fails_cleanly() {
        let result = decompress(&[0xFF, 0x00, 0xAB, 0xCD]);
        assert!(matches!(
            result,
            Err(NetError::Protocol(ProtocolError::Decompression(_)))
        ));
    }
}
