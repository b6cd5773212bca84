//! SkyPilot provisioner driving the `sky` CLI
//!
//! Clusters are identified by name. Once a cluster is UP, SkyPilot writes an
//! SSH alias for it into `~/.ssh/config`, so the cluster name doubles as the
//! SSH host.

use async_trait::async_trait;
use bench_core::{CloudProvisioner, ComputeInstance, Error, InstanceStatus, Result};
use bench_runtime::{run_streaming, CommandLine};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, info, warn};

/// Markers in `sky launch` output that mean no region had capacity
const CAPACITY_MARKERS: &[&str] = &["ResourcesUnavailableError", "Failed to provision all possible launchable resources"];

/// Cluster launch request
#[derive(Debug, Clone, PartialEq)]
pub struct SkyPilotSpec {
    pub name: String,
    /// Passed through verbatim as the task's `resources` section
    pub resources: serde_yaml::Value,
    pub envs: BTreeMap<String, String>,
}

impl SkyPilotSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: serde_yaml::Value::Null,
            envs: BTreeMap::new(),
        }
    }
}

/// `benchmaq-` followed by eight random hex digits
pub fn default_cluster_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("benchmaq-{}", &id[..8])
}

#[derive(Serialize)]
struct TaskFile<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "serde_yaml::Value::is_null")]
    resources: &'a serde_yaml::Value,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    envs: &'a BTreeMap<String, String>,
}

/// Task YAML for a bare cluster: no `setup` or `run`, work arrives over SSH
pub fn task_yaml(spec: &SkyPilotSpec) -> Result<String> {
    let task = TaskFile {
        name: &spec.name,
        resources: &spec.resources,
        envs: &spec.envs,
    };
    Ok(serde_yaml::to_string(&task)?)
}

/// Parse the cluster table printed by `sky status`
pub fn parse_status(output: &str) -> Vec<ComputeInstance> {
    let mut clusters = Vec::new();
    let mut in_table = false;

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            if in_table {
                break;
            }
            continue;
        };

        if *first == "NAME" {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }

        let status = tokens[1..]
            .iter()
            .find(|t| matches!(**t, "UP" | "INIT" | "STOPPED"))
            .map(|t| InstanceStatus::parse(t));
        let Some(status) = status else {
            debug!("Skipping unrecognised status row: {}", line);
            continue;
        };

        let mut instance = ComputeInstance::new(*first, *first, status);
        if instance.is_running() {
            instance = instance.with_ssh(*first, 22);
        }
        clusters.push(instance);
    }

    clusters
}

/// Provisioner backed by the local `sky` installation
#[derive(Debug, Clone)]
pub struct SkyPilotClient {
    program: String,
    work_dir: PathBuf,
}

impl SkyPilotClient {
    pub fn new() -> Self {
        Self {
            program: "sky".to_string(),
            work_dir: std::env::temp_dir(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Where task files are written before launch
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Run a `sky` subcommand quietly, returning (success, combined output)
    async fn capture(&self, args: &[&str]) -> Result<(bool, String)> {
        let cmd = CommandLine::new(&self.program).args(args.iter().copied());
        debug!("Running: {}", cmd);
        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::process(format!("Failed to run {}: {}", cmd, e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text))
    }

    async fn status(&self, names: &[&str]) -> Result<Vec<ComputeInstance>> {
        let mut args = vec!["status"];
        args.extend_from_slice(names);
        let (ok, output) = self.capture(&args).await?;
        if !ok {
            return Err(Error::provider(format!("sky status failed: {}", output.trim())));
        }
        Ok(parse_status(&output))
    }
}

impl Default for SkyPilotClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudProvisioner for SkyPilotClient {
    type Spec = SkyPilotSpec;

    async fn create(&self, spec: &SkyPilotSpec) -> Result<ComputeInstance> {
        let task_path = self.work_dir.join(format!("{}.sky.yaml", spec.name));
        tokio::fs::write(&task_path, task_yaml(spec)?).await?;

        let cmd = CommandLine::new(&self.program)
            .args(["launch", "-c", spec.name.as_str(), "-y"])
            .arg(task_path.to_string_lossy());
        info!("Launching SkyPilot cluster: {}", cmd);
        let result = run_streaming(&cmd, None).await;

        if let Err(e) = tokio::fs::remove_file(&task_path).await {
            debug!("Could not remove task file {}: {}", task_path.display(), e);
        }
        let output = result?;

        if !output.success() {
            let capacity = output
                .lines
                .iter()
                .any(|l| CAPACITY_MARKERS.iter().any(|m| l.contains(m)));
            let message = format!("sky launch for {} exited with code {:?}", spec.name, output.exit_code);
            return Err(if capacity {
                Error::capacity_unavailable(message)
            } else {
                Error::provider(message)
            });
        }

        info!("SkyPilot cluster {} is up", spec.name);
        Ok(ComputeInstance::new(&spec.name, &spec.name, InstanceStatus::Running).with_ssh(&spec.name, 22))
    }

    async fn find(&self, id: &str) -> Result<Option<ComputeInstance>> {
        Ok(self.status(&[id]).await?.into_iter().find(|c| c.id == id))
    }

    async fn list(&self) -> Result<Vec<ComputeInstance>> {
        self.status(&[]).await
    }

    async fn terminate(&self, id: &str) -> Result<()> {
        info!("Tearing down SkyPilot cluster {}", id);
        let (ok, output) = self.capture(&["down", "-y", id]).await?;
        if ok {
            return Ok(());
        }

        let lower = output.to_lowercase();
        if lower.contains("does not exist") || lower.contains("not found") {
            warn!("Cluster {} does not exist", id);
            return Err(Error::not_found(format!("cluster {}", id)));
        }
        Err(Error::provider(format!("sky down {} failed: {}", id, output.trim())))
    }
}
