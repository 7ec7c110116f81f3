//! The synchronized record and the clock that stamps it.

use arcsync_codec::{
    pack, unpack, ArchiveReader, ArchiveWriter, CodecResult, Decode, Encode, Timestamp,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Content that can be synchronized.
///
/// Blanket-implemented for every type with the required bounds; users only
/// implement [`Encode`] and [`Decode`] for their own structs.
pub trait Payload: Encode + Decode + Default + Clone + PartialEq + Send + Sync + 'static {}

impl<T> Payload for T where
    T: Encode + Decode + Default + Clone + PartialEq + Send + Sync + 'static
{
}

/// A timestamped payload: the single value every replica converges on.
///
/// Two archives are ordered only by timestamp. The payload takes no part in
/// deciding which version wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Archive<P> {
    payload: P,
    timestamp: Timestamp,
}

impl<P> Archive<P> {
    /// Creates an archive.
    pub fn new(payload: P, timestamp: Timestamp) -> Self {
        Self { payload, timestamp }
    }

    /// The payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// When this version was produced.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Consumes the archive, returning the payload.
    pub fn into_payload(self) -> P {
        self.payload
    }

    /// True iff this archive strictly supersedes `other`.
    pub fn is_newer_than(&self, other: &Archive<P>) -> bool {
        self.timestamp > other.timestamp
    }
}

impl<P: Default> Default for Archive<P> {
    fn default() -> Self {
        Self::new(P::default(), Timestamp::MIN)
    }
}

impl<P: Encode> Encode for Archive<P> {
    fn encode(&self, writer: &mut ArchiveWriter) {
        writer.put_timestamp(self.timestamp).put(&self.payload);
    }
}

impl<P: Decode> Decode for Archive<P> {
    fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
        let timestamp = reader.timestamp()?;
        let payload = reader.get()?;
        Ok(Self { payload, timestamp })
    }
}

impl<P: Payload> Archive<P> {
    /// Encodes and compresses the archive for the cache or the remote.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn to_blob(&self) -> CodecResult<Vec<u8>> {
        pack(self)
    }

    /// Decodes an archive produced by [`Archive::to_blob`].
    ///
    /// # Errors
    ///
    /// Returns an error for blobs that are not compressed archives or that
    /// do not match the payload's schema.
    pub fn from_blob(blob: &[u8]) -> CodecResult<Self> {
        unpack(blob)
    }
}

/// Where an accepted candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A local mutation.
    Local,
    /// The cache, restored at startup.
    Disk,
    /// A remote fetch.
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Disk => write!(f, "disk"),
            Origin::Remote => write!(f, "remote"),
        }
    }
}

/// Source of timestamps for local mutations.
pub trait Clock: Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock driven by hand, for deterministic tests.
///
/// Each reading returns the current value and then advances it by `step`,
/// so a step of zero gives a frozen clock.
///
/// ```
/// use arcsync_engine::{Clock, ManualClock};
///
/// let clock = ManualClock::ticking(10, 5);
/// assert_eq!(clock.now().as_millis(), 10);
/// assert_eq!(clock.now().as_millis(), 15);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
    step: u64,
}

impl ManualClock {
    /// A frozen clock reading `millis`.
    pub fn new(millis: u64) -> Self {
        Self::ticking(millis, 0)
    }

    /// A clock starting at `start` that advances by `step` on every reading.
    pub fn ticking(start: u64, step: u64) -> Self {
        Self {
            millis: AtomicU64::new(start),
            step,
        }
    }

    /// Moves the clock to `millis`.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// The value the next reading will return.
    pub fn peek(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.fetch_add(self.step, Ordering::SeqCst))
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcsync_codec::CodecError;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Note {
        text: String,
        pinned: bool,
    }

    impl Encode for Note {
        fn encode(&self, writer: &mut ArchiveWriter) {
            writer.put_str(&self.text).put_bool(self.pinned);
        }
    }

    impl Decode for Note {
        fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
            Ok(Self {
                text: reader.string()?,
                pinned: reader.bool()?,
            })
        }
    }

    fn note(text: &str, millis: u64) -> Archive<Note> {
        Archive::new(
            Note {
                text: text.into(),
                pinned: true,
            },
            Timestamp::from_millis(millis),
        )
    }

    #[test]
    fn default_archive_is_minimal() {
        let archive = Archive::<Note>::default();
        assert_eq!(archive.timestamp(), Timestamp::MIN);
        assert_eq!(archive.payload(), &Note::default());
    }

    #[test]
    fn ordering_ignores_payload() {
        let a = note("a", 5);
        let b = note("b", 5);
        let c = note("a", 6);
        assert!(!a.is_newer_than(&b));
        assert!(!b.is_newer_than(&a));
        assert!(c.is_newer_than(&a));
        assert!(!a.is_newer_than(&c));
    }

    #[test]
    fn blob_roundtrip() {
        let archive = note("groceries", 1_700_000_000_000);
        let blob = archive.to_blob().unwrap();
        assert_eq!(Archive::<Note>::from_blob(&blob).unwrap(), archive);
    }

    #[test]
    fn timestamp_leads_the_encoding() {
        let archive = note("x", 42);
        let bytes = arcsync_codec::to_bytes(&archive);
        assert_eq!(&bytes[..Timestamp::SIZE], &42u64.to_le_bytes());
    }

    #[test]
    fn garbage_blob_is_rejected() {
        assert!(matches!(
            Archive::<Note>::from_blob(b"definitely not zstd"),
            Err(CodecError::CorruptArchive { .. })
        ));
    }

    #[test]
    fn manual_clock() {
        let clock = ManualClock::new(7);
        assert_eq!(clock.now(), Timestamp::from_millis(7));
        assert_eq!(clock.now(), Timestamp::from_millis(7));
        clock.advance(3);
        assert_eq!(clock.peek(), Timestamp::from_millis(10));
        clock.set(100);
        assert_eq!(clock.now(), Timestamp::from_millis(100));

        let ticking = ManualClock::ticking(1, 1);
        let readings: Vec<u64> = (0..3).map(|_| ticking.now().as_millis()).collect();
        assert_eq!(readings, vec![1, 2, 3]);
    }

    #[test]
    fn origin_display() {
        assert_eq!(Origin::Local.to_string(), "local");
        assert_eq!(Origin::Disk.to_string(), "disk");
        assert_eq!(Origin::Remote.to_string(), "remote");
    }
}
