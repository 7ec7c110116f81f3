//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiescence window before a pending cache write is flushed.
    pub debounce: Duration,
    /// Pulls requested within this window of the previous fetch are dropped.
    pub pull_coalesce_window: Duration,
    /// Upper bound for a single fetch or push.
    pub remote_timeout: Duration,
    /// Upper bound for resolving the remote identity.
    pub identity_timeout: Duration,
    /// Default wait used by [`SyncEngine::is_reachable`](crate::SyncEngine::is_reachable).
    pub reachability_timeout: Duration,
    /// Interval for automatic pulls, if any.
    pub pull_interval: Option<Duration>,
    /// Whether to pull once right after the cache has been loaded.
    pub pull_on_start: bool,
}

impl SyncConfig {
    /// Creates a configuration with the default timings.
    pub fn new() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            pull_coalesce_window: Duration::from_secs(2),
            remote_timeout: Duration::from_secs(10),
            identity_timeout: Duration::from_secs(10),
            reachability_timeout: Duration::from_secs(9),
            pull_interval: None,
            pull_on_start: true,
        }
    }

    /// Sets the persistence debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the pull coalescing window.
    pub fn with_pull_coalesce_window(mut self, window: Duration) -> Self {
        self.pull_coalesce_window = window;
        self
    }

    /// Sets the fetch and push timeout.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Sets the identity resolution timeout.
    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// Sets the default reachability wait.
    pub fn with_reachability_timeout(mut self, timeout: Duration) -> Self {
        self.reachability_timeout = timeout;
        self
    }

    /// Sets the interval for automatic pulls.
    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = Some(interval);
        self
    }

    /// Enables or disables the startup pull.
    pub fn with_pull_on_start(mut self, pull: bool) -> Self {
        self.pull_on_start = pull;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
