//! Flat fixed-width encoder.

use crate::timestamp::Timestamp;
use crate::Encode;
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Encode a value into a standalone byte vector.
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut writer = ArchiveWriter::new();
    value.encode(&mut writer);
    writer.into_bytes().to_vec()
}

/// An append-only encoder for archive fields.
///
/// Fields are written back to back in the order the caller declares them,
/// with no tags or separators. All integers are little-endian. Variable
/// length data is embedded with [`ArchiveWriter::put_wrapped`], which
/// prefixes the block with its `u32` length so it can be unwrapped
/// symmetrically.
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    buffer: BytesMut,
}

impl ArchiveWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Create a new writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Consume this writer and return the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append a `u8`.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.put_u8(value);
        self
    }

    /// Append a `u16`.
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.buffer.put_u16_le(value);
        self
    }

    /// Append a `u32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.put_u32_le(value);
        self
    }

    /// Append a `u64`.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buffer.put_u64_le(value);
        self
    }

    /// Append a boolean as a single `0`/`1` byte.
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.buffer.put_u8(u8::from(value));
        self
    }

    /// Append a timestamp as 8 bytes of epoch milliseconds.
    pub fn put_timestamp(&mut self, value: Timestamp) -> &mut Self {
        self.put_u64(value.as_millis())
    }

    /// Append a UUID as its 16 raw bytes.
    pub fn put_uuid(&mut self, value: &Uuid) -> &mut Self {
        self.buffer.put_slice(value.as_bytes());
        self
    }

    /// Append raw bytes with no length prefix.
    ///
    /// The reader must know the exact length to consume them back.
    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.put_slice(bytes);
        self
    }

    /// Append a block prefixed with its own `u32` length.
    ///
    /// The block must be shorter than 4 GiB; such a blob could never be
    /// packed anyway, as [`compress`](crate::compress) refuses anything
    /// over [`MAX_DECOMPRESSED_SIZE`](crate::MAX_DECOMPRESSED_SIZE).
    pub fn put_wrapped(&mut self, block: &[u8]) -> &mut Self {
        self.put_u32(length_prefix(block.len()));
        self.buffer.put_slice(block);
        self
    }

    /// Append a UTF-8 string as a wrapped block.
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_wrapped(value.as_bytes())
    }

    /// Append any encodable value.
    pub fn put<T: Encode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }
}

/// Converts a block or sequence length to its `u32` prefix.
pub(crate) fn length_prefix(len: usize) -> u32 {
    debug_assert!(
        u32::try_from(len).is_ok(),
        "length {len} does not fit a u32 prefix"
    );
    u32::try_from(len).unwrap_or(u32::MAX)
}
