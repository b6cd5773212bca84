//! Mock implementations of the orchestration seams for testing
//!
//! Every mock writes to a shared [`CallLog`], so a test can assert on the exact
//! order of observable calls across components.

use async_trait::async_trait;
use bench_core::{
    ArtifactCollector, CloudProvisioner, CollectionReport, ComputeInstance, ConnectionEndpoint,
    Error, HandshakeProbe, InstanceStatus, LoadGenerator, ModelDownload, ModelFetcher, PlanEntry,
    Result, ResultArtifact, ServerSupervisor, TrialSpec,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ordered record of observable calls, shared between mocks
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: impl Into<String>) {
        let call = call.into();
        debug!("mock call: {}", call);
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    /// Full entries, e.g. `server-start:llama`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Entries with their `:detail` suffix removed
    pub fn kinds(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| k.as_str() == kind).count()
    }

    /// Index of the first entry equal to `call`
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }
}

/// Ports currently bound by mock servers, shared between supervisors
#[derive(Debug, Clone, Default)]
pub struct PortTable {
    bound: Arc<Mutex<HashSet<u16>>>,
}

impl PortTable {
    fn claim(&self, port: u16) -> bool {
        self.bound.lock().unwrap_or_else(|e| e.into_inner()).insert(port)
    }

    fn release(&self, port: u16) {
        self.bound.lock().unwrap_or_else(|e| e.into_inner()).remove(&port);
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.bound.lock().unwrap_or_else(|e| e.into_inner()).contains(&port)
    }
}

/// Supervisor that binds ports in a [`PortTable`] instead of spawning processes
#[derive(Debug, Clone)]
pub struct MockSupervisor {
    log: CallLog,
    ports: PortTable,
    healthy: bool,
    shutdown_delay: Duration,
    running: Arc<Mutex<Option<(String, u16)>>>,
}

impl MockSupervisor {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ports: PortTable::default(),
            healthy: true,
            shutdown_delay: Duration::ZERO,
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Servers never become healthy
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Slow down `stop` to widen any race between stop and the next start
    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    pub fn ports(&self) -> PortTable {
        self.ports.clone()
    }
}

#[async_trait]
impl ServerSupervisor for MockSupervisor {
    async fn start(&mut self, entry: &PlanEntry) -> Result<bool> {
        let port = entry.serve.port;
        if !self.ports.claim(port) {
            self.log.record(format!("port-conflict:{}", port));
            return Err(Error::process(format!("port {} already in use", port)));
        }
        *self.running.lock().unwrap_or_else(|e| e.into_inner()) = Some((entry.name.clone(), port));
        self.log.record(format!("server-start:{}", entry.name));

        if self.healthy {
            self.log.record(format!("health-ok:{}", entry.name));
        } else {
            self.log.record(format!("health-failed:{}", entry.name));
        }
        Ok(self.healthy)
    }

    async fn stop(&mut self) -> Result<()> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some((name, port)) = running else {
            return Ok(());
        };

        tokio::time::sleep(self.shutdown_delay).await;
        self.log.record(format!("server-stop:{}", name));
        self.ports.release(port);
        self.log.record(format!("port-released:{}", port));
        Ok(())
    }
}

/// Load generator that records trials and can fail or hang on demand
#[derive(Debug, Clone)]
pub struct MockLoadGenerator {
    log: CallLog,
    counter: Arc<AtomicUsize>,
    fail_on: HashSet<usize>,
    interrupt_on: Option<(usize, CancellationToken)>,
}

impl MockLoadGenerator {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            counter: Arc::new(AtomicUsize::new(0)),
            fail_on: HashSet::new(),
            interrupt_on: None,
        }
    }

    /// Make the n-th trial (1-based, across the whole plan) exit with code 1
    pub fn failing_on(mut self, trial: usize) -> Self {
        self.fail_on.insert(trial);
        self
    }

    /// Cancel `token` while the n-th trial runs, then hang until dropped
    pub fn interrupting_on(mut self, trial: usize, token: CancellationToken) -> Self {
        self.interrupt_on = Some((trial, token));
        self
    }
}

#[async_trait]
impl LoadGenerator for MockLoadGenerator {
    async fn run_trial(
        &self,
        entry: &PlanEntry,
        trial: &TrialSpec,
        result_name: &str,
    ) -> Result<ResultArtifact> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.record(format!("trial{}-run:{}", n, result_name));

        if let Some((at, token)) = &self.interrupt_on {
            if *at == n {
                token.cancel();
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        let mut artifact = ResultArtifact::new(result_name, &entry.name);
        if self.fail_on.contains(&n) {
            artifact.exit_code = Some(1);
            return Err(Error::trial(format!("{} exited with code Some(1)", result_name)));
        }

        artifact.exit_code = Some(0);
        if trial.results.save_result {
            let dir = Path::new(&trial.results.result_dir);
            artifact.structured_result = Some(dir.join(format!("{}.json", result_name)));
            artifact.log_path = Some(dir.join(format!("{}.txt", result_name)));
        }
        Ok(artifact)
    }
}

/// Model fetcher that records downloads
#[derive(Debug, Clone)]
pub struct MockFetcher {
    log: CallLog,
    fail: bool,
}

impl MockFetcher {
    pub fn new(log: CallLog) -> Self {
        Self { log, fail: false }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl ModelFetcher for MockFetcher {
    async fn fetch(&self, download: &ModelDownload) -> Result<()> {
        self.log.record(format!("model-download:{}", download.repo_id));
        if self.fail {
            return Err(Error::download("exit code 1"));
        }
        Ok(())
    }
}

/// Scripted answer to one `create` call
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created,
    CapacityUnavailable,
    Fatal(String),
}

/// Creation request understood by [`MockProvisioner`]
#[derive(Debug, Clone, Default)]
pub struct MockSpec {
    pub name: String,
}

/// In-memory provider with scripted creation and readiness progressions
#[derive(Debug, Clone, Default)]
pub struct MockProvisioner {
    log: CallLog,
    inner: Arc<MockProvisionerInner>,
}

#[derive(Debug, Default)]
struct MockProvisionerInner {
    creates: Mutex<VecDeque<CreateOutcome>>,
    readiness: Mutex<VecDeque<ComputeInstance>>,
    instances: Mutex<HashMap<String, ComputeInstance>>,
    next_id: AtomicUsize,
}

impl MockProvisioner {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            inner: Arc::default(),
        }
    }

    /// Answers for successive `create` calls; `Created` once the script runs out
    pub fn with_creates(self, outcomes: impl IntoIterator<Item = CreateOutcome>) -> Self {
        self.inner
            .creates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(outcomes);
        self
    }

    /// States returned by successive `find` calls before the stored instance
    pub fn with_readiness(self, states: impl IntoIterator<Item = ComputeInstance>) -> Self {
        self.inner
            .readiness
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(states);
        self
    }

    /// Pre-populate an instance, e.g. one left over from an earlier run
    pub fn with_instance(self, instance: ComputeInstance) -> Self {
        self.inner
            .instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(instance.id.clone(), instance);
        self
    }

    pub fn instances(&self) -> Vec<ComputeInstance> {
        self.inner
            .instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CloudProvisioner for MockProvisioner {
    type Spec = MockSpec;

    async fn create(&self, spec: &MockSpec) -> Result<ComputeInstance> {
        let outcome = self
            .inner
            .creates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(CreateOutcome::Created);

        match outcome {
            CreateOutcome::CapacityUnavailable => {
                self.log.record("create-failed:capacity");
                Err(Error::capacity_unavailable(
                    "This machine is no longer available",
                ))
            }
            CreateOutcome::Fatal(message) => {
                self.log.record("create-failed:fatal");
                Err(Error::provider(message))
            }
            CreateOutcome::Created => {
                let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let instance = ComputeInstance::new(format!("mock-{}", n), &spec.name, InstanceStatus::Running)
                    .with_ssh("127.0.0.1", 22);
                self.log.record(format!("create:{}", instance.id));
                self.inner
                    .instances
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(instance.id.clone(), instance.clone());
                Ok(instance)
            }
        }
    }

    async fn find(&self, id: &str) -> Result<Option<ComputeInstance>> {
        let instances = self.inner.instances.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stored) = instances.get(id).cloned() else {
            return Ok(None);
        };
        drop(instances);

        let scripted = self
            .inner
            .readiness
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(Some(scripted.map(|mut s| {
            s.id = stored.id.clone();
            s
        }).unwrap_or(stored)))
    }

    async fn list(&self) -> Result<Vec<ComputeInstance>> {
        Ok(self.instances())
    }

    async fn terminate(&self, id: &str) -> Result<()> {
        self.log.record(format!("destroy:{}", id));
        let removed = self
            .inner
            .instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match removed {
            Some(_) => Ok(()),
            None => Err(Error::not_found(format!("instance {}", id))),
        }
    }
}

/// SSH handshake probe that succeeds after a number of failures
#[derive(Debug, Clone)]
pub struct MockProbe {
    log: CallLog,
    failures_before_success: Arc<AtomicUsize>,
}

impl MockProbe {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failures_before_success: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_first(self, n: usize) -> Self {
        self.failures_before_success.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl HandshakeProbe for MockProbe {
    async fn handshake(&self, endpoint: &ConnectionEndpoint) -> bool {
        let remaining = self.failures_before_success.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
            self.log.record(format!("handshake-failed:{}", endpoint.host));
            return false;
        }
        self.log.record(format!("wait-ready:{}", endpoint.host));
        true
    }
}

/// Collector that "downloads" a fixed listing per remote directory
#[derive(Debug, Clone)]
pub struct MockCollector {
    log: CallLog,
    listing: HashMap<String, Vec<String>>,
    broken: HashSet<String>,
}

impl MockCollector {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            listing: HashMap::new(),
            broken: HashSet::new(),
        }
    }

    pub fn with_files(mut self, dir: impl Into<String>, files: Vec<String>) -> Self {
        self.listing.insert(dir.into(), files);
        self
    }

    /// Transfers of this file fail
    pub fn with_broken_file(mut self, file: impl Into<String>) -> Self {
        self.broken.insert(file.into());
        self
    }
}

#[async_trait]
impl ArtifactCollector for MockCollector {
    async fn collect(
        &self,
        _endpoint: &ConnectionEndpoint,
        remote_dirs: &[String],
        _local_dir: &Path,
    ) -> CollectionReport {
        let mut report = CollectionReport::default();
        for dir in remote_dirs {
            for file in self.listing.get(dir).into_iter().flatten() {
                if self.broken.contains(file) {
                    report.errors.push(format!("{}: transfer failed", file));
                    continue;
                }
                self.log.record(format!("download:{}", file));
                report.downloaded.push(file.clone());
            }
        }
        report
    }
}
