//! Fuzz testing harnesses for arcsync.
//!
//! These targets can be driven by cargo-fuzz or any other fuzzer. Each one
//! must return normally for every input; a panic is a bug.

use crate::fixtures::Counter;
use arcsync_codec::{decompress, from_bytes, ArchiveReader, MAX_DECOMPRESSED_SIZE};
use arcsync_engine::Archive;

/// Fuzz target for decoding a cached or fetched blob.
///
/// Arbitrary bytes either decode to an archive that re-encodes to a blob
/// decoding to the same archive, or fail with an error.
pub fn fuzz_archive_blob(data: &[u8]) {
    if let Ok(archive) = Archive::<Counter>::from_blob(data) {
        let blob = archive.to_blob().expect("Decoded archive must re-encode");
        let again = Archive::<Counter>::from_blob(&blob).expect("Re-encoded blob must decode");
        assert_eq!(archive, again, "Roundtrip mismatch");
    }
}

/// Fuzz target for decoding uncompressed archive fields.
pub fn fuzz_archive_fields(data: &[u8]) {
    let _ = from_bytes::<Archive<Counter>>(data);
}

/// Fuzz target for decompression.
///
/// Output never exceeds the decompression cap.
pub fn fuzz_decompress(data: &[u8]) {
    if let Ok(out) = decompress(data) {
        assert!(out.len() as u64 <= MAX_DECOMPRESSED_SIZE);
    }
}

/// Fuzz target for the field reader.
///
/// The first byte picks the field kind, repeatedly, until the input is used
/// up or a read fails.
pub fn fuzz_reader(data: &[u8]) {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let mut reader = ArchiveReader::new(rest);
    let mut kind = selector;
    while !reader.is_empty() {
        let before = reader.remaining_len();
        let ok = match kind % 8 {
            0 => reader.u8().is_ok(),
            1 => reader.u16().is_ok(),
            2 => reader.u32().is_ok(),
            3 => reader.u64().is_ok(),
            4 => reader.bool().is_ok(),
            5 => reader.uuid().is_ok(),
            6 => reader.unwrap_block().is_ok(),
            _ => reader.string().is_ok(),
        };
        if !ok {
            // Fixed-width integer and uuid reads never consume on failure.
            if matches!(kind % 8, 0..=3 | 5) {
                assert_eq!(reader.remaining_len(), before);
            }
            return;
        }
        kind = kind.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::counter_archive;
    use proptest::prelude::*;

    #[test]
    fn valid_blob_passes() {
        let blob = counter_archive(3, 30).to_blob().unwrap();
        fuzz_archive_blob(&blob);
    }

    #[test]
    fn empty_inputs() {
        fuzz_archive_blob(&[]);
        fuzz_archive_fields(&[]);
        fuzz_decompress(&[]);
        fuzz_reader(&[]);
    }

    #[test]
    fn zstd_magic_with_garbage() {
        let mut data = vec![0x28, 0xb5, 0x2f, 0xfd];
        data.extend_from_slice(&[0xff; 32]);
        fuzz_archive_blob(&data);
        fuzz_decompress(&data);
    }

    proptest! {
        #[test]
        fn random_blobs_never_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
            fuzz_archive_blob(&data);
            fuzz_archive_fields(&data);
            fuzz_decompress(&data);
            fuzz_reader(&data);
        }
    }
}
