//! Flat fixed-width decoder.

use crate::error::{CodecError, CodecResult};
use crate::timestamp::Timestamp;
use crate::Decode;
use uuid::Uuid;

/// Decode a value from the front of `bytes`.
///
/// Trailing bytes after the value are ignored, matching how nested blocks
/// are consumed from a larger stream.
///
/// # Errors
///
/// Returns [`CodecError::TruncatedData`] if the bytes end before the value
/// is complete, or [`CodecError::CorruptArchive`] for invalid field values.
pub fn from_bytes<T: Decode>(bytes: &[u8]) -> CodecResult<T> {
    let mut reader = ArchiveReader::new(bytes);
    T::decode(&mut reader)
}

/// A cursor that consumes archive fields from the front of a buffer.
///
/// The format is not self-describing: callers read fields in exactly the
/// order they were written.
pub struct ArchiveReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ArchiveReader<'a> {
    /// Create a new reader over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Number of unread bytes.
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Read a `u8`.
    pub fn u8(&mut self) -> CodecResult<u8> {
        let bytes = self.take(1)?;
        Ok(bytes[0])
    }

    /// Read a `u16`.
    pub fn u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Read a `u32`.
    pub fn u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Read a `u64`.
    pub fn u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Read a one-byte boolean. Only `0` and `1` are accepted.
    pub fn bool(&mut self) -> CodecResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::corrupt(format!("invalid bool byte {other}"))),
        }
    }

    /// Read an 8-byte epoch timestamp.
    pub fn timestamp(&mut self) -> CodecResult<Timestamp> {
        self.u64().map(Timestamp::from_millis)
    }

    /// Read a 16-byte UUID.
    pub fn uuid(&mut self) -> CodecResult<Uuid> {
        Ok(Uuid::from_bytes(self.array()?))
    }

    /// Read exactly `len` raw bytes.
    pub fn raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        self.take(len)
    }

    /// Read a block written with `put_wrapped`.
    pub fn unwrap_block(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Read a UTF-8 string written with `put_str`.
    pub fn string(&mut self) -> CodecResult<String> {
        let block = self.unwrap_block()?;
        std::str::from_utf8(block)
            .map(str::to_owned)
            .map_err(|_| CodecError::corrupt("invalid UTF-8 string"))
    }

    /// Read any decodable value.
    pub fn get<T: Decode>(&mut self) -> CodecResult<T> {
        T::decode(self)
    }

    #[inline]
    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let remaining = self.remaining_len();
        if len > remaining {
            return Err(CodecError::truncated(len, remaining));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    #[inline]
    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArchiveWriter;

    #[test]
    fn read_primitives_in_order() {
        let bytes = [1, 2, 0, 3, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 1, 0];
        let mut reader = ArchiveReader::new(&bytes);
        assert_eq!(reader.u8().unwrap(), 1);
        assert_eq!(reader.u16().unwrap(), 2);
        assert_eq!(reader.u32().unwrap(), 3);
        assert_eq!(reader.u64().unwrap(), 4);
        assert!(reader.bool().unwrap());
        assert!(!reader.bool().unwrap());
        assert!(reader.is_empty());
    }

    #[test]
    fn truncated_reports_sizes() {
        let mut reader = ArchiveReader::new(&[1, 2, 3]);
        assert_eq!(
            reader.u64(),
            Err(CodecError::TruncatedData {
                needed: 8,
                remaining: 3
            })
        );
        // A failed read consumes nothing.
        assert_eq!(reader.remaining_len(), 3);
    }

    #[test]
    fn empty_input_is_truncated() {
        let mut reader = ArchiveReader::new(&[]);
        assert!(matches!(reader.u8(), Err(CodecError::TruncatedData { .. })));
    }

    #[test]
    fn unwrap_extracts_exact_block() {
        let mut writer = ArchiveWriter::new();
        writer.put_wrapped(&[1, 2, 3, 4, 5, 6]).put_u8(42);
        let bytes = writer.into_bytes();

        let mut reader = ArchiveReader::new(&bytes);
        assert_eq!(reader.unwrap_block().unwrap(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(reader.u8().unwrap(), 42);
    }

    #[test]
    fn wrapped_length_beyond_input_is_truncated() {
        // Claims 10 bytes, provides 2.
        let bytes = [10, 0, 0, 0, 1, 2];
        let mut reader = ArchiveReader::new(&bytes);
        assert_eq!(
            reader.unwrap_block(),
            Err(CodecError::TruncatedData {
                needed: 10,
                remaining: 2
            })
        );
    }

    #[test]
    fn invalid_bool_is_corrupt() {
        let mut reader = ArchiveReader::new(&[2]);
        assert!(matches!(
            reader.bool(),
            Err(CodecError::CorruptArchive { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let bytes = [2, 0, 0, 0, 0xff, 0xfe];
        let mut reader = ArchiveReader::new(&bytes);
        assert!(matches!(
            reader.string(),
            Err(CodecError::CorruptArchive { .. })
        ));
    }

    #[test]
    fn from_bytes_ignores_trailing() {
        let value: u16 = from_bytes(&[5, 0, 99]).unwrap();
        assert_eq!(value, 5);
    }
}
