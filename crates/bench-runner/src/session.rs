//! Top-level run orchestration
//!
//! A [`RunSession`] binds a benchmark plan to one execution target and always
//! comes back with a [`RunOutcome`]; errors and interruptions are folded into
//! the outcome instead of escaping.
//!
//! For cloud targets the instance id is recorded the moment creation returns,
//! and everything after that point runs before a single destroy call. The
//! operator's interrupt ends the wait or the work early but never skips
//! result collection or teardown. A controller that is killed outright can
//! still leak an instance; check the provider console after a hard kill.

use bench_cloud::{create_with_retry, ConnectivityWaiter, RetryPolicy};
use bench_core::{
    ArtifactCollector, BenchmarkPlan, CloudProvisioner, ComputeInstance, ConnectionEndpoint,
    Credential, Error, PlanReport, Result, RunOutcome, RunStatus, WorkExecutor,
};
use bench_remote::{EnvironmentSpec, RemoteSession, ResultCollector, SshClient};
use bench_runtime::{RuntimeConfig, TrialSequencer};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::task::RemotePlanExecutor;

/// How work reaches a remote host and how its results come back
#[derive(Clone)]
pub struct RemoteBackend {
    executor: Arc<dyn WorkExecutor>,
    collector: Arc<dyn ArtifactCollector>,
}

impl RemoteBackend {
    pub fn new(executor: Arc<dyn WorkExecutor>, collector: Arc<dyn ArtifactCollector>) -> Self {
        Self { executor, collector }
    }

    /// Plans shipped over SSH, results pulled back with scp
    pub fn ssh(ssh: SshClient, environment: EnvironmentSpec, binary: PathBuf, runtime: RuntimeConfig) -> Self {
        let session = RemoteSession::new(ssh.clone()).with_interrupt_grace(runtime.interrupt_grace());
        Self::new(
            Arc::new(RemotePlanExecutor::new(session, environment, binary, runtime)),
            Arc::new(ResultCollector::new(ssh)),
        )
    }
}

/// An instance to create, wait for, and destroy
pub struct CloudTarget<'a, P: CloudProvisioner + ?Sized> {
    pub provisioner: &'a P,
    pub spec: &'a P::Spec,
    pub retry: RetryPolicy,
    pub waiter: ConnectivityWaiter,
    /// How to log in once the instance is up
    pub credential: Credential,
    pub username: Option<String>,
}

/// Accumulates what a run produced while it is in progress
#[derive(Debug, Default)]
struct Progress {
    results: Vec<String>,
    downloaded: Vec<String>,
    failures: Vec<String>,
    instance: Option<String>,
}

impl Progress {
    /// Keep what `report` finished; an interrupted plan is an interrupted run
    fn absorb(&mut self, report: PlanReport) -> Result<()> {
        self.results.extend(report.result_names());
        self.failures.extend(report.failures);
        if report.interrupted {
            warn!("Benchmark interrupted after {} results", self.results.len());
            return Err(Error::interrupted("interrupted during benchmark"));
        }
        Ok(())
    }

    fn into_outcome(self, started_at: DateTime<Utc>, result: Result<()>) -> RunOutcome {
        let (status, error) = match result {
            Ok(()) => (RunStatus::Success, None),
            Err(e) if e.is_interrupted() => (RunStatus::Interrupted, Some(e.to_string())),
            Err(e) => {
                error!(category = e.category(), "Run failed: {}", e);
                (RunStatus::Error, Some(e.to_string()))
            }
        };
        RunOutcome {
            status,
            results: self.results,
            downloaded: self.downloaded,
            failures: self.failures,
            error,
            instance: self.instance,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// One benchmark plan driven to completion on one target
pub struct RunSession {
    plan: BenchmarkPlan,
    /// Local directory that remote result directories are mirrored under
    results_dir: PathBuf,
    cancel: CancellationToken,
}

impl RunSession {
    pub fn new(plan: BenchmarkPlan, cancel: CancellationToken) -> Self {
        Self {
            plan,
            results_dir: PathBuf::from("."),
            cancel,
        }
    }

    /// Run `fut` unless the operator interrupts first
    async fn interruptible<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                warn!("Interrupted during {}", what);
                Err(Error::interrupted(format!("interrupted during {}", what)))
            }
            result = fut => result,
        }
    }

    /// Run the plan on this host
    pub async fn run_local(&self, sequencer: &mut TrialSequencer) -> RunOutcome {
        let started_at = Utc::now();
        let mut progress = Progress::default();

        info!("Running {} plan entries locally", self.plan.entries.len());
        let report = sequencer.run(&self.plan, &self.cancel).await;
        let result = progress.absorb(report);

        progress.into_outcome(started_at, result)
    }

    /// Run the plan on an existing SSH host and pull its results back
    pub async fn run_remote(&self, endpoint: &ConnectionEndpoint, backend: &RemoteBackend) -> RunOutcome {
        let started_at = Utc::now();
        let mut progress = Progress::default();
        let result = self.execute_and_collect(endpoint, &self.plan, backend, &mut progress).await;
        progress.into_outcome(started_at, result)
    }

    /// Create an instance, run the plan on it, collect, and destroy it.
    ///
    /// Once creation has returned an id, destroy is called exactly once
    /// whatever happens afterwards.
    pub async fn run_cloud<P>(&self, target: &CloudTarget<'_, P>, backend: &RemoteBackend) -> RunOutcome
    where
        P: CloudProvisioner + ?Sized,
    {
        let started_at = Utc::now();
        let mut progress = Progress::default();

        let instance = match create_with_retry(target.provisioner, target.spec, &target.retry, &self.cancel).await {
            Ok(instance) => instance,
            Err(e) => {
                error!("Instance creation failed: {}", e);
                return progress.into_outcome(started_at, Err(e));
            }
        };
        info!("Created instance {} ({})", instance.name, instance.id);
        progress.instance = Some(instance.id.clone());

        let result = self.drive_instance(target, &instance, backend, &mut progress).await;

        info!("Destroying instance {}...", instance.id);
        match target.provisioner.destroy(&instance.id).await {
            Ok(()) => info!("Instance {} destroyed", instance.id),
            Err(e) => {
                error!(
                    "FAILED TO DESTROY INSTANCE {} ({}): {}. It may still be billing; terminate it manually.",
                    instance.name, instance.id, e
                );
                progress
                    .failures
                    .push(format!("destroy of instance {} failed: {}", instance.id, e));
            }
        }

        progress.into_outcome(started_at, result)
    }

    async fn drive_instance<P>(
        &self,
        target: &CloudTarget<'_, P>,
        instance: &ComputeInstance,
        backend: &RemoteBackend,
        progress: &mut Progress,
    ) -> Result<()>
    where
        P: CloudProvisioner + ?Sized,
    {
        let readiness = self
            .interruptible("connectivity wait", async {
                Ok::<_, Error>(target
                    .waiter
                    .wait(target.provisioner, &instance.id, &target.credential, target.username.as_deref())
                    .await)
            })
            .await?;

        let endpoint = match readiness.endpoint {
            Some(endpoint) if readiness.ready => endpoint,
            _ => {
                return Err(Error::timeout(format!(
                    "instance {} not reachable over SSH after {} attempts",
                    instance.id, readiness.attempts
                )))
            }
        };

        let plan = self.plan.clone().with_name_prefix(&instance.name);
        self.execute_and_collect(&endpoint, &plan, backend, progress).await
    }

    /// Run the plan remotely, then collect results even if the work failed
    /// or was interrupted. Cancellation is handed to the executor, which stops
    /// the remote plan and brings back what it finished.
    async fn execute_and_collect(
        &self,
        endpoint: &ConnectionEndpoint,
        plan: &BenchmarkPlan,
        backend: &RemoteBackend,
        progress: &mut Progress,
    ) -> Result<()> {
        let result = match backend.executor.execute(endpoint, plan, &self.cancel).await {
            Ok(report) => progress.absorb(report),
            Err(e) if self.cancel.is_cancelled() && !e.is_interrupted() => {
                Err(Error::interrupted(format!("interrupted during benchmark: {}", e)))
            }
            Err(e) => Err(e),
        };
        match &result {
            Err(e) if e.is_interrupted() => warn!("Remote benchmark on {} interrupted", endpoint),
            Err(e) => error!("Remote benchmark on {} failed: {}", endpoint, e),
            Ok(()) => {}
        }

        let dirs = plan.result_dirs();
        if dirs.is_empty() {
            info!("No trial saves results, nothing to collect");
            return result;
        }

        info!("Collecting results from {}", endpoint);
        let report = backend.collector.collect(endpoint, &dirs, &self.results_dir).await;
        for e in &report.errors {
            warn!("Result collection: {}", e);
        }
        progress.downloaded.extend(report.downloaded);

        result
    }
}
