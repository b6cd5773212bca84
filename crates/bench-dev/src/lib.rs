//! # bench-dev
//!
//! Development and testing utilities for benchmaq.
//!
//! This crate provides:
//! - Scripted mock implementations of every orchestration seam
//! - A shared call log so tests can assert on the order of observable calls
//! - Plan builders and test logging setup

pub mod mocks;
pub mod utils;

// Re-export commonly used types
pub use mocks::{
    CallLog, CreateOutcome, MockCollector, MockFetcher, MockLoadGenerator, MockProbe,
    MockProvisioner, MockSpec, MockSupervisor, PortTable,
};
pub use utils::{sample_entry, sample_plan, setup_test_logging};
