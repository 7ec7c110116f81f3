//! Property-based test generators using proptest.
//!
//! Provides strategies for payloads, archives and candidate sequences.

use crate::fixtures::Counter;
use arcsync_codec::Timestamp;
use arcsync_engine::Archive;
use proptest::prelude::*;

/// Strategy for timestamps within a small window, so sequences collide often.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0u64..64).prop_map(Timestamp::from_millis)
}

/// Strategy for labels.
pub fn tag_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9 ]{0,12}").expect("Invalid regex")
}

/// Strategy for counter payloads.
pub fn counter_strategy() -> impl Strategy<Value = Counter> {
    (
        any::<u32>(),
        any::<u64>(),
        prop::collection::vec(tag_strategy(), 0..6),
    )
        .prop_map(|(count, date, tags)| Counter {
            count,
            date: Timestamp::from_millis(date),
            tags,
        })
}

/// Strategy for archives.
pub fn archive_strategy() -> impl Strategy<Value = Archive<Counter>> {
    (counter_strategy(), timestamp_strategy())
        .prop_map(|(counter, timestamp)| Archive::new(counter, timestamp))
}

/// Strategy for non-empty candidate sequences.
pub fn candidate_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Archive<Counter>>> {
    prop::collection::vec(archive_strategy(), 1..max_len.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcsync_engine::{resolve, Resolution};

    proptest! {
        #[test]
        fn archive_blob_roundtrip(archive in archive_strategy()) {
            let blob = archive.to_blob().unwrap();
            prop_assert_eq!(Archive::<Counter>::from_blob(&blob).unwrap(), archive);
        }

        #[test]
        fn fold_keeps_first_maximum(candidates in candidate_sequence_strategy(32)) {
            let mut current: Option<Archive<Counter>> = None;
            for candidate in &candidates {
                if resolve(current.as_ref(), candidate) == Resolution::Accept {
                    current = Some(candidate.clone());
                }
            }

            let max = candidates.iter().map(Archive::timestamp).max().unwrap();
            let first_max = candidates.iter().find(|c| c.timestamp() == max).unwrap();
            prop_assert_eq!(current.as_ref(), Some(first_max));
        }

        #[test]
        fn sequences_are_non_empty(candidates in candidate_sequence_strategy(1)) {
            prop_assert!(!candidates.is_empty());
        }
    }
}
