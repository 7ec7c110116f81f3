//! Stress tests for arcsync.
//!
//! These drive one engine from many concurrent tasks and check that no
//! mutation is lost and that persistence and push stay coalesced.

use crate::fixtures::{settle, TestEngine};
use arcsync_codec::Timestamp;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Mutations submitted.
    pub mutations: usize,
    /// Final counter value.
    pub final_count: u32,
    /// Final archive timestamp.
    pub final_timestamp: Timestamp,
    /// Versions a subscriber observed, including the initial replay.
    pub observed_versions: usize,
    /// Cache writes performed.
    pub writes: usize,
    /// Remote pushes attempted.
    pub pushes: usize,
    /// Total duration.
    pub duration: Duration,
    /// Mutations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Mutations: {}", self.mutations);
        println!("Final count: {}", self.final_count);
        println!("Observed versions: {}", self.observed_versions);
        println!("Writes: {}", self.writes);
        println!("Pushes: {}", self.pushes);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent writer tasks.
    pub writers: usize,
    /// Mutations each writer submits.
    pub mutations_per_writer: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 8,
            mutations_per_writer: 250,
        }
    }
}

/// Runs concurrent increments from `config.writers` tasks against one engine.
///
/// The engine stamps every mutation from a ticking clock, so every
/// increment is accepted and the final count equals the number submitted.
pub async fn stress_concurrent_mutations(config: &StressConfig) -> StressTestResult {
    let test = TestEngine::spawn();
    let mut subscription = test.subscribe();

    let start = Instant::now();
    let mut writers = JoinSet::new();
    for _ in 0..config.writers {
        let engine = test.engine.clone();
        let count = config.mutations_per_writer;
        writers.spawn(async move {
            for _ in 0..count {
                engine.mutate(|counter| counter.count += 1);
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(joined) = writers.join_next().await {
        joined.expect("Writer task panicked");
    }

    let mutations = config.writers * config.mutations_per_writer;
    let current = test.current().await;
    let duration = start.elapsed();
    settle().await;

    let mut observed_versions = 0;
    while subscription.try_recv().is_some() {
        observed_versions += 1;
    }

    let ops_per_second = if duration.as_secs_f64() > 0.0 {
        mutations as f64 / duration.as_secs_f64()
    } else {
        0.0
    };

    StressTestResult {
        mutations,
        final_count: current.payload().count,
        final_timestamp: current.timestamp(),
        observed_versions,
        writes: test.store.write_count(),
        pushes: test.gateway.push_count(),
        duration,
        ops_per_second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations() {
        let config = StressConfig {
            writers: 4,
            mutations_per_writer: 100,
        };
        let result = stress_concurrent_mutations(&config).await;
        result.print_summary("Concurrent Mutations");

        assert_eq!(result.final_count as usize, result.mutations);
        assert_eq!(result.observed_versions, result.mutations + 1);
        assert!(result.writes >= 1);
        assert!(result.writes < result.mutations);
        assert!(result.pushes >= 1);
    }

    #[tokio::test]
    async fn test_single_writer() {
        let config = StressConfig {
            writers: 1,
            mutations_per_writer: 50,
        };
        let result = stress_concurrent_mutations(&config).await;

        assert_eq!(result.final_count, 50);
        assert_eq!(result.final_timestamp, Timestamp::from_millis(1_049));
    }
}
