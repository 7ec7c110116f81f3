//! Whole-blob compression.
//!
//! Compression is applied to a complete encoded archive, never per field.
//! The frame format is zstd; its magic number and checksums let us reject
//! input that was never compressed instead of decoding garbage.

use crate::error::{CodecError, CodecResult};
use std::io::Read;

/// zstd level used for archives. Archives are small and written often.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Upper bound on decompressed size.
///
/// Protects against decompression bombs from a tampered cache file or
/// remote record. 64 MB is far beyond any legitimate archive.
pub const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024 * 1024;

/// Compress an encoded archive.
///
/// # Errors
///
/// Returns [`CodecError::CompressionFailed`] if the input is larger than
/// [`MAX_DECOMPRESSED_SIZE`], since [`decompress`] would refuse it, or if
/// the compressor fails.
pub fn compress(data: &[u8]) -> CodecResult<Vec<u8>> {
    if data.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(CodecError::CompressionFailed {
            message: format!("archive exceeds {MAX_DECOMPRESSED_SIZE} bytes"),
        });
    }
    zstd::bulk::compress(data, COMPRESSION_LEVEL).map_err(|e| CodecError::CompressionFailed {
        message: e.to_string(),
    })
}

/// Decompress a blob produced by [`compress`].
///
/// # Errors
///
/// Returns [`CodecError::CorruptArchive`] if the input is empty, is not a
/// compressed frame (including already-decompressed data), is damaged, or
/// expands beyond [`MAX_DECOMPRESSED_SIZE`].
pub fn decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    if data.is_empty() {
        return Err(CodecError::corrupt("empty compressed input"));
    }

    let decoder = zstd::stream::read::Decoder::new(data)
        .map_err(|e| CodecError::corrupt(format!("invalid compressed frame: {e}")))?;

    let mut out = Vec::new();
    decoder
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::corrupt(format!("invalid compressed frame: {e}")))?;

    if out.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(CodecError::corrupt(format!(
            "decompressed size exceeds {MAX_DECOMPRESSED_SIZE} bytes"
        )));
    }

    Ok(out)
}
