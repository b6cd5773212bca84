//! The serialized plan that travels to a remote host
//!
//! A remote run uploads a task file (plan plus runtime settings) and the
//! `benchmaq` binary, then runs `benchmaq exec --plan <file>` on the host.
//! The remote side prints its [`PlanReport`] as the last output line behind
//! [`RESULT_MARKER`], which is how the report comes back through the stream.

use async_trait::async_trait;
use bench_core::{
    BenchmarkPlan, ConnectionEndpoint, Error, ErrorContext, PlanReport, Result, WorkExecutor,
};
use bench_remote::{shell_quote, EnvironmentSpec, RemoteSession, RemoteWork, Upload};
use bench_runtime::{RuntimeConfig, StreamOutput, TrialSequencer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Prefix of the output line carrying the serialized plan report
pub const RESULT_MARKER: &str = "BENCHMAQ_RESULT";

const TASK_FILE: &str = "plan.json";
const BINARY_NAME: &str = "benchmaq";

/// Everything the remote side needs to run a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFile {
    pub plan: BenchmarkPlan,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl TaskFile {
    pub fn new(plan: BenchmarkPlan, runtime: RuntimeConfig) -> Self {
        Self { plan, runtime }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Run the plan on this host with real processes
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<PlanReport> {
        let mut sequencer = TrialSequencer::local(&self.runtime)?;
        Ok(sequencer.run(&self.plan, cancel).await)
    }
}

/// The line the remote side prints last
pub fn result_line(report: &PlanReport) -> Result<String> {
    Ok(format!("{} {}", RESULT_MARKER, serde_json::to_string(report)?))
}

/// The report from the last marker line in `lines`, if any
pub fn parse_result_line(lines: &[String]) -> Option<Result<PlanReport>> {
    lines.iter().rev().find_map(|line| {
        line.trim()
            .strip_prefix(RESULT_MARKER)
            .map(|json| serde_json::from_str(json.trim()).map_err(Error::from))
    })
}

/// A plan shipped as a task file next to the binary that runs it
#[derive(Debug, Clone)]
pub struct PlanTask {
    task: TaskFile,
    binary: PathBuf,
}

impl PlanTask {
    pub fn new(task: TaskFile, binary: impl Into<PathBuf>) -> Self {
        Self {
            task,
            binary: binary.into(),
        }
    }
}

impl RemoteWork for PlanTask {
    type Output = PlanReport;

    fn uploads(&self) -> Result<Vec<Upload>> {
        Ok(vec![
            Upload::Bytes {
                name: TASK_FILE.to_string(),
                contents: self.task.to_json()?.into_bytes(),
            },
            Upload::File {
                name: BINARY_NAME.to_string(),
                path: self.binary.clone(),
                executable: true,
            },
        ])
    }

    fn command(&self, work_dir: &str) -> String {
        format!(
            "{} exec --plan {}",
            shell_quote(&format!("{}/{}", work_dir, BINARY_NAME)),
            shell_quote(&format!("{}/{}", work_dir, TASK_FILE))
        )
    }

    fn finish(&self, output: StreamOutput) -> Result<PlanReport> {
        match parse_result_line(&output.lines) {
            Some(report) => report,
            None if output.success() => Err(Error::process("remote plan finished without reporting a result")),
            None => Err(Error::process(format!(
                "remote plan exited with code {:?}",
                output.exit_code
            ))),
        }
    }
}

/// Runs plans on SSH hosts through a [`RemoteSession`]
#[derive(Debug, Clone)]
pub struct RemotePlanExecutor {
    session: RemoteSession,
    environment: EnvironmentSpec,
    binary: PathBuf,
    runtime: RuntimeConfig,
}

impl RemotePlanExecutor {
    pub fn new(
        session: RemoteSession,
        environment: EnvironmentSpec,
        binary: impl Into<PathBuf>,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            session,
            environment,
            binary: binary.into(),
            runtime,
        }
    }
}

#[async_trait]
impl WorkExecutor for RemotePlanExecutor {
    async fn execute(
        &self,
        endpoint: &ConnectionEndpoint,
        plan: &BenchmarkPlan,
        cancel: &CancellationToken,
    ) -> Result<PlanReport> {
        info!(
            "Running {} plan entries ({} trials) on {}",
            plan.entries.len(),
            plan.trial_count(),
            endpoint
        );
        debug!("Shipping binary {}", self.binary.display());
        let task = PlanTask::new(TaskFile::new(plan.clone(), self.runtime.clone()), &self.binary);
        self.session.run(endpoint, &self.environment, &task, cancel).await
    }
}
