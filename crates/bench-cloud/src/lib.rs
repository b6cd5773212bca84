//! # bench-cloud
//!
//! Ephemeral GPU capacity for benchmaq runs.
//!
//! This crate provides:
//! - A RunPod provisioner speaking the provider's GraphQL API with an explicit credential
//! - A SkyPilot provisioner driving the `sky` CLI
//! - Bounded retry of spot creation on capacity-unavailable answers
//! - The connectivity waiter that turns a freshly created instance into a reachable
//!   SSH endpoint

pub mod connectivity;
pub mod provision;
pub mod runpod;
pub mod skypilot;

// Re-export main types
pub use connectivity::{Budget, ConnectivityWaiter, Readiness, WaitPolicy};
pub use provision::{create_with_retry, RetryPolicy};
pub use runpod::{InstanceType, PodSpec, RunPodClient, RunPodCredential};
pub use skypilot::{default_cluster_name, SkyPilotClient, SkyPilotSpec};
