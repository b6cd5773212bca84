//! # bench-runtime
//!
//! Local execution side of benchmaq: everything that runs on the GPU host.
//!
//! This crate provides:
//! - Supervision of one model-serving process (health-polled start, graceful stop,
//!   port-release confirmation)
//! - Command-line builders for the vLLM and SGLang serve and bench tools
//! - Live streaming of subprocess output with a filtered copy for persistence
//! - Model weight download and the benchmark trial runner
//! - The trial sequencer that walks a benchmark plan entry by entry
//!
//! ## Example
//!
//! ```rust,no_run
//! use bench_core::PlanConfig;
//! use bench_runtime::{RuntimeConfig, TrialSequencer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plan = PlanConfig::from_file("bench.yaml")?.to_plan()?;
//!     let mut sequencer = TrialSequencer::local(&RuntimeConfig::default())?;
//!     let report = sequencer.run(&plan, &CancellationToken::new()).await;
//!     println!("{} results", report.artifacts.len());
//!     Ok(())
//! }
//! ```

pub mod benchmark;
pub mod config;
pub mod download;
pub mod engine;
pub mod health;
pub mod process;
pub mod sequencer;
pub mod stream;

// Re-export main types
pub use benchmark::BenchmarkRunner;
pub use config::{EngineBinaries, HealthPolicy, RuntimeConfig, SupervisorConfig};
pub use download::HfDownloader;
pub use engine::CommandLine;
pub use health::HealthChecker;
pub use process::ProcessSupervisor;
pub use sequencer::TrialSequencer;
pub use stream::{run_streaming, StreamOutput};
