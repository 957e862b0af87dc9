//! Verity Testing Infrastructure
//!
//! Shared fixtures for the workspace's tests: definition builders, bodies with
//! scripted behaviour and assertion macros over execution trees.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,no_run
//! use verity_testkit::*;
//!
//! let calls = CallCounter::new();
//! let def = definition("flaky").repeat(5, 3);
//! let def = with_body(def, pass_first(3, &calls));
//! ```

pub mod assertions;
pub mod bodies;
pub mod builders;

pub use bodies::*;
pub use builders::*;

/// Install a test-writer subscriber once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
