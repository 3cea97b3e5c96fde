#![deny(unsafe_code)]

//! Shared test utilities for the aflow workspace.
//!
//! Provides config builders, on-disk source tree fixtures, sample tool
//! implementations and tracing helpers so that crate tests stay concise.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! aflow-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod harness;
pub mod tools;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use harness::TestAflow;
pub use tracing_setup::init_test_tracing;
