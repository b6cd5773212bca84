//! # bench-runner
//!
//! Top-level runs for benchmaq.
//!
//! This crate ties the plan, the execution target and the ambient settings of
//! one configuration document together. It picks the target (this host, an
//! existing SSH host, a RunPod pod or a SkyPilot cluster), drives the run
//! through a [`RunSession`], and guarantees that any instance it created is
//! destroyed before it returns.

pub mod config;
pub mod logging;
pub mod session;
pub mod task;

// Re-export commonly used types
pub use config::{expand_tilde, RemoteConfig, RunConfig, RunPodConfig, SkyPilotConfig};
pub use logging::init_logging;
pub use session::{CloudTarget, RemoteBackend, RunSession};
pub use task::{parse_result_line, result_line, PlanTask, RemotePlanExecutor, TaskFile, RESULT_MARKER};

use bench_cloud::{ConnectivityWaiter, RunPodClient, SkyPilotClient, WaitPolicy};
use bench_core::{Result, RunOutcome};
use bench_remote::SshClient;
use bench_runtime::TrialSequencer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn ssh_backend(config: &RunConfig) -> Result<RemoteBackend> {
    Ok(RemoteBackend::ssh(
        SshClient::default(),
        config.environment(),
        config.remote_binary()?,
        config.runtime.clone(),
    ))
}

/// Run the plan on this host, or on `remote:` when the document has one
pub async fn bench(config: &RunConfig, cancel: CancellationToken) -> Result<RunOutcome> {
    config.validate()?;
    let session = RunSession::new(config.to_plan()?, cancel);

    match &config.remote {
        Some(remote) => {
            info!("Running benchmark on remote host {}", remote.host);
            let backend = ssh_backend(config)?;
            Ok(session.run_remote(&remote.endpoint(), &backend).await)
        }
        None => {
            let mut sequencer = TrialSequencer::local(&config.runtime)?;
            Ok(session.run_local(&mut sequencer).await)
        }
    }
}

/// Deploy a pod, benchmark on it, collect results, and delete it
pub async fn runpod_bench(config: &RunConfig, cancel: CancellationToken) -> Result<RunOutcome> {
    let runpod = config.runpod()?;
    config.validate()?;

    let client = RunPodClient::new(runpod.credential()?)?;
    let spec = runpod.pod_spec();
    let backend = ssh_backend(config)?;
    let target = CloudTarget {
        provisioner: &client,
        spec: &spec,
        retry: runpod.retry_policy(),
        waiter: ConnectivityWaiter::new(Arc::new(SshClient::default()), runpod.wait_policy()),
        credential: runpod.ssh_credential(),
        username: Some("root".to_string()),
    };

    info!("Deploying pod {} ({})", spec.display_name(), spec.gpu_type);
    Ok(RunSession::new(config.to_plan()?, cancel)
        .run_cloud(&target, &backend)
        .await)
}

/// Launch a SkyPilot cluster, benchmark on it, collect results, and tear it down
pub async fn sky_bench(config: &RunConfig, cancel: CancellationToken) -> Result<RunOutcome> {
    let sky = config.skypilot()?;
    config.validate()?;

    let client = SkyPilotClient::new();
    let spec = sky.spec();
    let backend = ssh_backend(config)?;
    let target = CloudTarget {
        provisioner: &client,
        spec: &spec,
        retry: Default::default(),
        waiter: ConnectivityWaiter::new(Arc::new(SshClient::default()), WaitPolicy::default()),
        credential: sky.ssh_credential(),
        username: sky.ssh_user.clone(),
    };

    info!("Launching SkyPilot cluster {}", spec.name);
    Ok(RunSession::new(config.to_plan()?, cancel)
        .run_cloud(&target, &backend)
        .await)
}
