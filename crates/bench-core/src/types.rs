//! Common types used throughout benchmaq

use crate::args::ArgMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default port the serving engine binds
pub const DEFAULT_SERVE_PORT: u16 = 8000;

/// Default local directory for persisted results
pub const DEFAULT_RESULT_DIR: &str = "./benchmark_results";

/// Model-serving engine driven by a plan entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Vllm,
    Sglang,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Vllm => write!(f, "vllm"),
            Engine::Sglang => write!(f, "sglang"),
        }
    }
}

impl FromStr for Engine {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vllm" => Ok(Engine::Vllm),
            "sglang" => Ok(Engine::Sglang),
            other => Err(crate::Error::config(format!(
                "unsupported engine '{}' (expected vllm or sglang)",
                other
            ))),
        }
    }
}

/// Weights to fetch before the server starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDownload {
    pub repo_id: String,
    pub local_dir: String,
    /// Falls back to `HF_TOKEN` in the environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hf_token: Option<String>,
}

/// One invocation of the model-serving process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServeSpec {
    /// Model identifier or local path
    pub model: String,
    pub port: u16,
    /// Engine-specific settings forwarded as flags
    #[serde(default)]
    pub args: ArgMap,
}

impl ServeSpec {
    pub fn new(model: impl Into<String>, port: u16) -> Self {
        Self {
            model: model.into(),
            port,
            args: ArgMap::new(),
        }
    }

    pub fn with_args(mut self, args: ArgMap) -> Self {
        self.args = args;
        self
    }

    /// Base URL of the server on the host running it
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Readiness endpoint, 2xx once the server accepts traffic
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }
}

/// Whether and where a trial persists its artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsPolicy {
    #[serde(default)]
    pub save_result: bool,
    #[serde(default = "default_result_dir")]
    pub result_dir: String,
}

fn default_result_dir() -> String {
    DEFAULT_RESULT_DIR.to_string()
}

impl Default for ResultsPolicy {
    fn default() -> Self {
        Self {
            save_result: false,
            result_dir: default_result_dir(),
        }
    }
}

impl ResultsPolicy {
    pub fn saving(result_dir: impl Into<String>) -> Self {
        Self {
            save_result: true,
            result_dir: result_dir.into(),
        }
    }
}

/// One load-generation run against an already running server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSpec {
    pub args: ArgMap,
    #[serde(default)]
    pub results: ResultsPolicy,
}

impl TrialSpec {
    pub fn new(args: ArgMap, results: ResultsPolicy) -> Self {
        Self { args, results }
    }
}

/// One serve configuration and the trials that run against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub name: String,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<ModelDownload>,
    pub serve: ServeSpec,
    #[serde(default)]
    pub trials: Vec<TrialSpec>,
}

impl PlanEntry {
    /// Entries without a name or model are skipped rather than rejected
    pub fn is_runnable(&self) -> bool {
        !self.name.trim().is_empty() && !self.serve.model.trim().is_empty()
    }
}

/// Ordered sequence of plan entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkPlan {
    pub entries: Vec<PlanEntry>,
}

impl BenchmarkPlan {
    pub fn new(entries: Vec<PlanEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trial_count(&self) -> usize {
        self.entries.iter().map(|e| e.trials.len()).sum()
    }

    /// Directories trials persist into, first-seen order, without duplicates
    pub fn result_dirs(&self) -> Vec<String> {
        let mut dirs: Vec<String> = Vec::new();
        for trial in self.entries.iter().flat_map(|e| e.trials.iter()) {
            if trial.results.save_result && !dirs.contains(&trial.results.result_dir) {
                dirs.push(trial.results.result_dir.clone());
            }
        }
        dirs
    }

    /// Prefix every entry name, so results from different hosts never collide
    pub fn with_name_prefix(mut self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self;
        }
        for entry in &mut self.entries {
            if !entry.name.is_empty() {
                entry.name = format!("{}_{}", prefix, entry.name);
            }
        }
        self
    }
}

/// How to authenticate an SSH connection
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    Password(String),
    PrivateKey(PathBuf),
    /// Defer to the user's ssh config and agent
    SshConfig,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
            Credential::SshConfig => f.write_str("SshConfig"),
        }
    }
}

/// Resolved SSH connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub credential: Credential,
}

impl ConnectionEndpoint {
    pub fn new(host: impl Into<String>, port: u16, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            credential,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// `user@host`, or bare host when no user is set
    pub fn target(&self) -> String {
        match &self.username {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target(), self.port)
    }
}

/// Lifecycle status of a cloud instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Created,
    Running,
    Exited,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "CREATED" | "INIT" | "PENDING" => InstanceStatus::Created,
            "RUNNING" | "UP" => InstanceStatus::Running,
            "EXITED" | "STOPPED" => InstanceStatus::Exited,
            "TERMINATED" => InstanceStatus::Terminated,
            _ => InstanceStatus::Unknown,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Created => "CREATED",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Exited => "EXITED",
            InstanceStatus::Terminated => "TERMINATED",
            InstanceStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Public address mapped to an instance's SSH port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshAddress {
    pub ip: String,
    pub port: u16,
}

/// A leased cloud GPU machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeInstance {
    /// Provider-assigned identifier
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    /// Present once the provider reports runtime network info
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_hr: Option<f64>,
}

impl ComputeInstance {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: InstanceStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            ssh: None,
            gpu_type: None,
            cost_per_hr: None,
        }
    }

    pub fn with_ssh(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.ssh = Some(SshAddress { ip: ip.into(), port });
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }
}

/// Output of one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub result_name: String,
    pub entry_name: String,
    /// Structured result file, when the results policy persisted one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_result: Option<PathBuf>,
    /// Filtered console log file, when persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Filtered console lines, kept in memory for the caller only
    #[serde(default, skip_serializing)]
    pub console_log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ResultArtifact {
    pub fn new(result_name: impl Into<String>, entry_name: impl Into<String>) -> Self {
        Self {
            result_name: result_name.into(),
            entry_name: entry_name.into(),
            structured_result: None,
            log_path: None,
            console_log: Vec::new(),
            exit_code: None,
        }
    }
}

/// What a plan execution produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanReport {
    pub artifacts: Vec<ResultArtifact>,
    /// Per-entry and per-trial failures that did not stop the plan
    #[serde(default)]
    pub failures: Vec<String>,
    /// The operator stopped the plan before it finished
    #[serde(default)]
    pub interrupted: bool,
}

impl PlanReport {
    pub fn result_names(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.result_name.clone()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of pulling artifacts back from a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub downloaded: Vec<String>,
    pub errors: Vec<String>,
}

impl CollectionReport {
    pub fn merge(&mut self, other: CollectionReport) {
        self.downloaded.extend(other.downloaded);
        self.errors.extend(other.errors);
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Interrupted,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Error => 1,
            RunStatus::Interrupted => 130,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Error => write!(f, "error"),
            RunStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Result of a top-level run, returned instead of raising
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub results: Vec<String>,
    pub downloaded: Vec<String>,
    pub failures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Cloud instance the run leased, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success if !self.failures.is_empty() => 1,
            status => status.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, dir: &str, save: bool) -> PlanEntry {
        PlanEntry {
            name: name.to_string(),
            engine: Engine::Vllm,
            download: None,
            serve: ServeSpec::new("meta-llama/Llama-3.1-8B", DEFAULT_SERVE_PORT),
            trials: vec![TrialSpec::new(
                ArgMap::new().with("num_prompts", 10),
                ResultsPolicy {
                    save_result: save,
                    result_dir: dir.to_string(),
                },
            )],
        }
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!("vLLM".parse::<Engine>().unwrap(), Engine::Vllm);
        assert_eq!("sglang".parse::<Engine>().unwrap(), Engine::Sglang);
        assert!("tgi".parse::<Engine>().is_err());
    }

    #[test]
    fn test_serve_urls() {
        let serve = ServeSpec::new("m", 8123);
        assert_eq!(serve.health_url(), "http://localhost:8123/health");
    }

    #[test]
    fn test_result_dirs_dedupe() {
        let plan = BenchmarkPlan::new(vec![
            entry("a", "./results", true),
            entry("b", "./results", true),
            entry("c", "./other", false),
            entry("d", "./more", true),
        ]);
        assert_eq!(plan.result_dirs(), vec!["./results", "./more"]);
        assert_eq!(plan.trial_count(), 4);
    }

    #[test]
    fn test_name_prefix() {
        let plan = BenchmarkPlan::new(vec![entry("llama", "./r", true), entry("", "./r", true)])
            .with_name_prefix("H100_1");
        assert_eq!(plan.entries[0].name, "H100_1_llama");
        assert_eq!(plan.entries[1].name, "");
        assert!(!plan.entries[1].is_runnable());
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = Credential::Password("hunter2".into());
        assert!(!format!("{:?}", cred).contains("hunter2"));
    }

    #[test]
    fn test_instance_status_parse() {
        assert_eq!(InstanceStatus::parse("running"), InstanceStatus::Running);
        assert_eq!(InstanceStatus::parse("EXITED"), InstanceStatus::Exited);
        assert_eq!(InstanceStatus::parse("weird"), InstanceStatus::Unknown);
    }

    #[test]
    fn test_endpoint_display() {
        let ep = ConnectionEndpoint::new("10.0.0.5", 2222, Credential::SshConfig).with_username("root");
        assert_eq!(ep.to_string(), "root@10.0.0.5:2222");
    }

    #[test]
    fn test_outcome_exit_codes() {
        let now = Utc::now();
        let mut outcome = RunOutcome {
            status: RunStatus::Success,
            results: vec![],
            downloaded: vec![],
            failures: vec![],
            error: None,
            instance: None,
            started_at: now,
            finished_at: now,
        };
        assert_eq!(outcome.exit_code(), 0);
        outcome.failures.push("trial failed".into());
        assert_eq!(outcome.exit_code(), 1);
        outcome.status = RunStatus::Interrupted;
        assert_eq!(outcome.exit_code(), 130);
    }

    #[test]
    fn test_plan_report_roundtrip_drops_console() {
        let mut artifact = ResultArtifact::new("r", "e");
        artifact.console_log.push("line".into());
        let report = PlanReport {
            artifacts: vec![artifact],
            failures: vec![],
            interrupted: true,
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: PlanReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.result_names(), vec!["r"]);
        assert!(back.artifacts[0].console_log.is_empty());
        assert!(back.interrupted);

        let old: PlanReport = serde_json::from_str(r#"{"artifacts":[]}"#).unwrap();
        assert!(!old.interrupted);
    }
}
