//! # arcsync testkit
//!
//! Test utilities for arcsync.
//!
//! This crate provides:
//! - A sample payload and engine fixtures over in-memory boundaries
//! - Property-based test generators using proptest
//! - Fuzz testing harnesses
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arcsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_engine() {
//!     let test = TestEngine::spawn();
//!     test.mutate(|counter| counter.count += 1);
//!     assert_eq!(test.current().await.payload().count, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use arcsync_engine::{Archive, ManualClock, SyncConfig, SyncEngine, SyncError, Timestamp};
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use stress::*;
