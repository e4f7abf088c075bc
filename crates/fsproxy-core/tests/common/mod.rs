//! Common test utilities for fsproxy integration tests.

#![allow(dead_code)]

pub mod assertions;
pub mod harness;

pub use assertions::*;
pub use harness::{EventLog, TestRoot, fast_config, init_tracing};
