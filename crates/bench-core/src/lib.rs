//! # bench-core
//!
//! Core types, traits, and utilities for benchmaq, a lifecycle controller for
//! LLM inference-server benchmarks.
//!
//! This crate provides the foundational data structures and interfaces that are
//! shared across all other benchmaq components. It includes:
//!
//! - The benchmark plan model (serve specs, trials, results policy)
//! - Ordered engine argument maps and their command-line flag translation
//! - Collision-resistant result naming
//! - Plan configuration parsing for the freeform and grid document forms
//! - Traits for server supervision, load generation, provisioning and collection
//! - Error handling types and utilities

pub mod args;
pub mod config;
pub mod error;
pub mod naming;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root
pub use args::{ArgMap, ArgValue};
pub use config::{LoggingConfig, PlanConfig};
pub use error::{Error, ErrorContext, Result};
pub use naming::result_name;
pub use traits::{
    ArtifactCollector, CloudProvisioner, HandshakeProbe, LoadGenerator, ModelFetcher,
    ServerSupervisor, WorkExecutor,
};
pub use types::{
    BenchmarkPlan, CollectionReport, ComputeInstance, ConnectionEndpoint, Credential, Engine,
    InstanceStatus, ModelDownload, PlanEntry, PlanReport, ResultArtifact,
    ResultsPolicy, RunOutcome, RunStatus, ServeSpec, SshAddress, TrialSpec,
};
