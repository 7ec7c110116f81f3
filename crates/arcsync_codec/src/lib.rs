//! # arcsync codec
//!
//! Compact binary encoding and compression for arcsync archives.
//!
//! ## Format
//!
//! An encoded value is a flat concatenation of fixed-width fields in the
//! order the type declares them:
//!
//! - `u8`, `u16`, `u32`, `u64` (little-endian)
//! - `bool` as one byte (`0` or `1`)
//! - [`Timestamp`] as 8 bytes of epoch milliseconds
//! - `Uuid` as 16 raw bytes
//! - variable-length blocks *wrapped* with a `u32` length prefix
//!
//! There are no tags: decoding must follow the same schema as encoding.
//! The whole encoded blob is then compressed for storage and transport.
//!
//! ## Usage
//!
//! ```
//! use arcsync_codec::{pack, unpack, ArchiveReader, ArchiveWriter, CodecResult, Decode, Encode};
//!
//! #[derive(Debug, PartialEq)]
//! struct Point {
//!     x: u32,
//!     y: u32,
//! }
//!
//! impl Encode for Point {
//!     fn encode(&self, writer: &mut ArchiveWriter) {
//!         writer.put_u32(self.x).put_u32(self.y);
//!     }
//! }
//!
//! impl Decode for Point {
//!     fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
//!         Ok(Self { x: reader.u32()?, y: reader.u32()? })
//!     }
//! }
//!
//! let bytes = pack(&Point { x: 1, y: 2 }).unwrap();
//! let point: Point = unpack(&bytes).unwrap();
//! assert_eq!(point, Point { x: 1, y: 2 });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compress;
mod error;
mod reader;
mod timestamp;
mod writer;

pub use compress::{compress, decompress, COMPRESSION_LEVEL, MAX_DECOMPRESSED_SIZE};
pub use error::{CodecError, CodecResult};
pub use reader::{from_bytes, ArchiveReader};
pub use timestamp::Timestamp;
pub use writer::{to_bytes, ArchiveWriter};

use uuid::Uuid;

/// Types that can be written as archive fields.
pub trait Encode {
    /// Append this value's fields to the writer.
    fn encode(&self, writer: &mut ArchiveWriter);
}

/// Types that can be read back from archive fields.
pub trait Decode: Sized {
    /// Consume this value's fields from the front of the reader.
    fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self>;
}

/// Encode then compress a value.
///
/// # Errors
///
/// Returns an error if compression fails.
pub fn pack<T: Encode + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    compress(&to_bytes(value))
}

/// Decompress then decode a value.
///
/// # Errors
///
/// Returns [`CodecError::CorruptArchive`] for bytes that do not decompress,
/// or [`CodecError::TruncatedData`] when the decompressed blob is too short
/// for the schema.
pub fn unpack<T: Decode>(bytes: &[u8]) -> CodecResult<T> {
    let data = decompress(bytes)?;
    from_bytes(&data)
}

macro_rules! impl_primitive {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Encode for $ty {
            fn encode(&self, writer: &mut ArchiveWriter) {
                writer.$put(*self);
            }
        }

        impl Decode for $ty {
            fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
                reader.$get()
            }
        }
    };
}

impl_primitive!(u8, put_u8, u8);
impl_primitive!(u16, put_u16, u16);
impl_primitive!(u32, put_u32, u32);
impl_primitive!(u64, put_u64, u64);
impl_primitive!(bool, put_bool, bool);
impl_primitive!(Timestamp, put_timestamp, timestamp);

impl Encode for Uuid {
    fn encode(&self, writer: &mut ArchiveWriter) {
        writer.put_uuid(self);
    }
}

impl Decode for Uuid {
    fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
        reader.uuid()
    }
}

impl Encode for str {
    fn encode(&self, writer: &mut ArchiveWriter) {
        writer.put_str(self);
    }
}

impl Encode for String {
    fn encode(&self, writer: &mut ArchiveWriter) {
        writer.put_str(self);
    }
}

impl Decode for String {
    fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
        reader.string()
    }
}

// Sequences carry a u32 element count followed by the elements; like
// wrapped blocks, they must hold fewer than u32::MAX elements.
impl<T: Encode> Encode for [T] {
    fn encode(&self, writer: &mut ArchiveWriter) {
        writer.put_u32(writer::length_prefix(self.len()));
        for item in self {
            item.encode(writer);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, writer: &mut ArchiveWriter) {
        self.as_slice().encode(writer);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
        let count = reader.u32()? as usize;
        // Every element takes at least one byte; don't trust the count for
        // preallocation beyond what the buffer could hold.
        let mut items = Vec::with_capacity(count.min(reader.remaining_len()));
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

// Optional values carry a presence flag byte.
impl<T: Encode> Encode for Option<T> {
    fn encode(&self, writer: &mut ArchiveWriter) {
        match self {
            Some(value) => {
                writer.put_bool(true);
                value.encode(writer);
            }
            None => {
                writer.put_bool(false);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
        if reader.bool()? {
            T::decode(reader).map(Some)
        } else {
            Ok(None)
        }
    }
}
