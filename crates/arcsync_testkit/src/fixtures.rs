//! Test fixtures and engine helpers.
//!
//! Provides a small payload type and an engine wired to in-memory
//! boundaries that tests can script and inspect.

use arcsync_codec::{ArchiveReader, ArchiveWriter, CodecResult, Decode, Encode, Timestamp};
use arcsync_engine::{Archive, ManualClock, MemoryGateway, SyncConfig, SyncEngine, SyncStats};
use arcsync_storage::{ArchiveStore, FileStore, InMemoryStore};
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

/// Debounce window used by test engines.
pub const TEST_DEBOUNCE: Duration = Duration::from_millis(25);

/// Identity the test remote resolves to.
pub const TEST_IDENTITY: &str = "test-user";

/// Base name of file caches created by [`file_store`].
pub const TEST_CACHE_NAME: &str = "Counter";

/// A payload shaped like a typical app model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counter {
    /// Incremented by most tests.
    pub count: u32,
    /// A date field set by the app.
    pub date: Timestamp,
    /// Free-form labels.
    pub tags: Vec<String>,
}

impl Encode for Counter {
    fn encode(&self, writer: &mut ArchiveWriter) {
        writer
            .put_u32(self.count)
            .put_timestamp(self.date)
            .put(&self.tags);
    }
}

impl Decode for Counter {
    fn decode(reader: &mut ArchiveReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            count: reader.u32()?,
            date: reader.timestamp()?,
            tags: reader.get()?,
        })
    }
}

/// A counter archive with the given count at `millis`.
pub fn counter_archive(count: u32, millis: u64) -> Archive<Counter> {
    Archive::new(
        Counter {
            count,
            ..Counter::default()
        },
        Timestamp::from_millis(millis),
    )
}

/// Engine configuration with short timings and no startup pull.
pub fn test_config() -> SyncConfig {
    SyncConfig::new()
        .with_debounce(TEST_DEBOUNCE)
        .with_pull_coalesce_window(Duration::ZERO)
        .with_remote_timeout(Duration::from_secs(2))
        .with_identity_timeout(Duration::from_secs(2))
        .with_reachability_timeout(Duration::from_secs(1))
        .with_pull_on_start(false)
}

/// Waits long enough for debounced writes and in-process gateway calls to
/// finish.
pub async fn settle() {
    tokio::time::sleep(TEST_DEBOUNCE * 6).await;
}

/// Installs a test-writer tracing subscriber once per process.
///
/// Filtering follows `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Opens the file cache for [`TEST_CACHE_NAME`] inside `dir`.
pub fn file_store(dir: &Path) -> Arc<dyn ArchiveStore> {
    Arc::new(FileStore::in_dir(dir, TEST_CACHE_NAME).expect("Failed to open file store"))
}

/// An engine wired to inspectable in-memory boundaries.
pub struct TestEngine {
    /// The engine handle.
    pub engine: SyncEngine<Counter>,
    /// The cache the engine writes to.
    pub store: Arc<InMemoryStore>,
    /// The remote the engine syncs with.
    pub gateway: MemoryGateway,
    /// The clock stamping local mutations.
    pub clock: Arc<ManualClock>,
}

impl TestEngine {
    /// Starts building a test engine.
    ///
    /// Defaults: [`test_config`], an empty cache, a remote that resolves to
    /// [`TEST_IDENTITY`] with no record, and a clock starting at 1000 ms that
    /// advances 1 ms per reading.
    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder {
            config: test_config(),
            store: Arc::new(InMemoryStore::new()),
            gateway: MemoryGateway::new(TEST_IDENTITY),
            clock: Arc::new(ManualClock::ticking(1_000, 1)),
        }
    }

    /// Spawns a test engine with the defaults.
    pub fn spawn() -> Self {
        Self::builder().spawn()
    }

    /// The current archive.
    pub async fn current(&self) -> Archive<Counter> {
        self.engine.current().await.expect("Engine stopped")
    }

    /// A statistics snapshot.
    pub async fn stats(&self) -> SyncStats {
        self.engine.stats().await.expect("Engine stopped")
    }

    /// The archive in the cache, if any.
    pub fn stored(&self) -> Option<Archive<Counter>> {
        self.store
            .data()
            .map(|blob| Archive::from_blob(&blob).expect("Cache holds a corrupt archive"))
    }

    /// The archive on the remote, if any.
    pub fn remote(&self) -> Option<Archive<Counter>> {
        self.gateway.archive()
    }

    /// Requests a pull and waits until a fetch has completed or failed.
    pub async fn pull(&self) {
        let before = self.stats().await;
        self.engine.request_sync();
        for _ in 0..200 {
            let now = self.stats().await;
            if now.fetches_completed + now.fetches_failed
                > before.fetches_completed + before.fetches_failed
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pull did not complete");
    }
}

impl std::ops::Deref for TestEngine {
    type Target = SyncEngine<Counter>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Builder for [`TestEngine`].
pub struct TestEngineBuilder {
    config: SyncConfig,
    store: Arc<InMemoryStore>,
    gateway: MemoryGateway,
    clock: Arc<ManualClock>,
}

impl TestEngineBuilder {
    /// Adjusts the engine configuration.
    pub fn config(mut self, adjust: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        self.config = adjust(self.config);
        self
    }

    /// Pulls once the cache has been loaded.
    pub fn pull_on_start(self) -> Self {
        self.config(|config| config.with_pull_on_start(true))
    }

    /// Starts with `archive` in the cache.
    pub fn cached(self, archive: &Archive<Counter>) -> Self {
        let blob = archive.to_blob().expect("Failed to pack archive");
        self.cached_bytes(blob)
    }

    /// Starts with raw bytes in the cache.
    pub fn cached_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.store = Arc::new(InMemoryStore::with_data(bytes));
        self
    }

    /// Starts with `archive` on the remote.
    pub fn remote(self, archive: &Archive<Counter>) -> Self {
        self.gateway
            .store_archive(archive)
            .expect("Failed to pack archive");
        self
    }

    /// Uses a remote with no account.
    pub fn signed_out(self) -> Self {
        self.gateway.set_identity(None);
        self
    }

    /// Uses `clock` to stamp mutations.
    pub fn clock(mut self, clock: ManualClock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Spawns the engine on the current runtime.
    pub fn spawn(self) -> TestEngine {
        init_tracing();
        let engine = SyncEngine::builder(self.config)
            .store(self.store.clone())
            .gateway(self.gateway.clone())
            .clock(Arc::clone(&self.clock))
            .spawn();

        TestEngine {
            engine,
            store: self.store,
            gateway: self.gateway,
            clock: self.clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn counter_blob_roundtrip() {
        let archive = Archive::new(
            Counter {
                count: 3,
                date: Timestamp::from_millis(10_000),
                tags: vec!["a".into(), "b".into()],
            },
            Timestamp::from_millis(99),
        );
        let blob = archive.to_blob().unwrap();
        assert_eq!(Archive::<Counter>::from_blob(&blob).unwrap(), archive);
    }

    #[test]
    fn counter_archive_helper() {
        let archive = counter_archive(4, 40);
        assert_eq!(archive.payload().count, 4);
        assert_eq!(archive.timestamp().as_millis(), 40);
    }

    #[test]
    fn file_store_uses_cache_name() {
        let dir = tempdir().unwrap();
        let store = file_store(dir.path());
        store.write(b"x").unwrap();
        assert!(dir
            .path()
            .join(arcsync_storage::cache_file_name(TEST_CACHE_NAME))
            .exists());
    }

    #[tokio::test]
    async fn test_engine_defaults() {
        let engine = TestEngine::spawn();
        assert_eq!(engine.current().await, Archive::default());
        assert_eq!(engine.stored(), None);
        assert_eq!(engine.remote(), None);
        assert_eq!(engine.clock.peek().as_millis(), 1_000);
    }

    #[tokio::test]
    async fn test_engine_builder_seeds_boundaries() {
        let engine = TestEngine::builder()
            .cached(&counter_archive(1, 5))
            .remote(&counter_archive(2, 8))
            .spawn();
        assert_eq!(engine.stored(), Some(counter_archive(1, 5)));
        assert_eq!(engine.remote(), Some(counter_archive(2, 8)));
        assert_eq!(engine.current().await, counter_archive(1, 5));
    }
}
