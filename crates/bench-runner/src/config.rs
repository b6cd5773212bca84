//! Run configuration document
//!
//! One YAML file carries the benchmark plan (`benchmark:` or `runs:`), an
//! optional execution target (`remote:`, `runpod:` or `skypilot:`), and the
//! `runtime:` and `logging:` sections. Everything is validated before any
//! billable call is made.

use bench_cloud::{
    default_cluster_name, Budget, InstanceType, PodSpec, RetryPolicy, RunPodCredential,
    SkyPilotSpec, WaitPolicy,
};
use bench_core::{
    BenchmarkPlan, ConnectionEndpoint, Credential, Error, LoggingConfig, PlanConfig, Result,
};
use bench_remote::{find_program, EnvironmentSpec, SshOptions, DEFAULT_DEPENDENCIES};
use bench_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// `benchmark:` and `runs:` sections
    #[serde(flatten)]
    pub plan: PlanConfig,

    /// Pre-existing SSH host
    #[serde(default)]
    pub remote: Option<RemoteConfig>,

    /// RunPod pod provisioned for the run
    #[serde(default)]
    pub runpod: Option<RunPodConfig>,

    /// SkyPilot cluster launched for the run
    #[serde(default)]
    pub skypilot: Option<SkyPilotConfig>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Expand a leading `~` to the local home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

/// `remote:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_filename: Option<String>,
    #[serde(default)]
    pub uv: UvConfig,
    #[serde(default = "default_dependencies")]
    pub dependencies: Vec<String>,
    /// Binary shipped to the host instead of the running executable
    #[serde(default)]
    pub binary: Option<String>,
}

/// Isolated environment on the remote host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UvConfig {
    pub path: String,
    pub python_version: String,
}

impl Default for UvConfig {
    fn default() -> Self {
        let env = EnvironmentSpec::default();
        Self {
            path: env.path,
            python_version: env.python_version,
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".to_string()
}

fn default_dependencies() -> Vec<String> {
    DEFAULT_DEPENDENCIES.iter().map(|d| d.to_string()).collect()
}

impl RemoteConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            username: default_username(),
            password: None,
            key_filename: None,
            uv: UvConfig::default(),
            dependencies: default_dependencies(),
            binary: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_with_path(&std::env::var_os("PATH").unwrap_or_default())
    }

    /// Validation that looks for `sshpass` in `search_path` instead of `PATH`
    pub fn validate_with_path(&self, search_path: &OsStr) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("remote.host cannot be empty"));
        }
        if self.port == 0 {
            return Err(Error::config("remote.port must be greater than 0"));
        }
        if self.password.is_none() && self.key_filename.is_none() {
            return Err(Error::config(
                "remote requires either `password` or `key_filename`",
            ));
        }
        let sshpass = SshOptions::default().sshpass_program;
        if self.password.is_some() && find_program(&sshpass, search_path).is_none() {
            return Err(Error::config(
                "remote.password needs `sshpass` on PATH; install it or use `key_filename`",
            ));
        }
        Ok(())
    }

    /// Password wins over a key file when both are given
    pub fn credential(&self) -> Credential {
        match (&self.password, &self.key_filename) {
            (Some(password), _) => Credential::Password(password.clone()),
            (None, Some(key)) => Credential::PrivateKey(expand_tilde(key)),
            (None, None) => Credential::SshConfig,
        }
    }

    pub fn endpoint(&self) -> ConnectionEndpoint {
        ConnectionEndpoint::new(&self.host, self.port, self.credential()).with_username(&self.username)
    }

    pub fn environment(&self) -> EnvironmentSpec {
        EnvironmentSpec {
            path: self.uv.path.clone(),
            python_version: self.uv.python_version.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

/// `runpod:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPodConfig {
    /// Falls back to `RUNPOD_API_KEY`
    #[serde(default)]
    pub runpod_api_key: Option<String>,
    #[serde(default = "default_ssh_key")]
    pub ssh_private_key: String,
    #[serde(default)]
    pub pod: PodSection,
    #[serde(default)]
    pub container: ContainerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub ports: PortsSection,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_ssh_key() -> String {
    "~/.ssh/id_ed25519".to_string()
}

impl Default for RunPodConfig {
    fn default() -> Self {
        Self {
            runpod_api_key: None,
            ssh_private_key: default_ssh_key(),
            pod: PodSection::default(),
            container: ContainerSection::default(),
            storage: StorageSection::default(),
            ports: PortsSection::default(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSection {
    pub name: Option<String>,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub instance_type: InstanceType,
    pub bid_per_gpu: Option<f64>,
    pub secure_cloud: bool,
    /// Total creation attempts while capacity is unavailable
    pub deploy_retries: u32,
    pub deploy_retry_interval: u64,
    /// SSH readiness polls, 0 means wait indefinitely
    pub ready_retries: u32,
    pub ready_interval: u64,
}

impl Default for PodSection {
    fn default() -> Self {
        Self {
            name: None,
            gpu_type: String::new(),
            gpu_count: 1,
            instance_type: InstanceType::Spot,
            bid_per_gpu: None,
            secure_cloud: true,
            deploy_retries: 10,
            deploy_retry_interval: 30,
            ready_retries: 60,
            ready_interval: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    pub image: String,
    pub disk_size: u32,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            image: String::new(),
            disk_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub volume_size: Option<u32>,
    pub mount_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            volume_size: None,
            mount_path: "/workspace".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsSection {
    pub http: Vec<u16>,
    pub tcp: Vec<u16>,
}

impl PortsSection {
    /// Provider port list; SSH is always exposed
    fn to_ports(&self) -> Option<Vec<String>> {
        if self.http.is_empty() && self.tcp.is_empty() {
            return None;
        }
        let mut ports: Vec<String> = self.http.iter().map(|p| format!("{}/http", p)).collect();
        ports.extend(self.tcp.iter().map(|p| format!("{}/tcp", p)));
        if !self.tcp.contains(&22) {
            ports.push("22/tcp".to_string());
        }
        Some(ports)
    }
}

impl RunPodConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pod.gpu_type.trim().is_empty() {
            return Err(Error::config("runpod.pod.gpu_type is required"));
        }
        if self.pod.gpu_count == 0 {
            return Err(Error::config("runpod.pod.gpu_count must be greater than 0"));
        }
        if self.container.image.trim().is_empty() {
            return Err(Error::config("runpod.container.image is required"));
        }
        if matches!(self.pod.bid_per_gpu, Some(bid) if bid <= 0.0) {
            return Err(Error::config("runpod.pod.bid_per_gpu must be positive"));
        }
        self.credential()?;
        Ok(())
    }

    pub fn credential(&self) -> Result<RunPodCredential> {
        RunPodCredential::resolve(self.runpod_api_key.as_deref())
    }

    pub fn pod_spec(&self) -> PodSpec {
        let mut spec = PodSpec::new(&self.pod.gpu_type, &self.container.image);
        spec.name = self.pod.name.clone().filter(|n| !n.trim().is_empty());
        spec.gpu_count = self.pod.gpu_count;
        spec.instance_type = self.pod.instance_type;
        spec.bid_per_gpu = self.pod.bid_per_gpu;
        spec.secure_cloud = self.pod.secure_cloud;
        spec.container_disk_gb = self.container.disk_size;
        spec.volume_gb = self.storage.volume_size;
        spec.volume_mount_path = self.storage.mount_path.clone();
        if let Some(ports) = self.ports.to_ports() {
            spec.ports = ports;
        }
        spec.env = self.env.clone();
        spec
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.pod.deploy_retries.max(1),
            interval: Duration::from_secs(self.pod.deploy_retry_interval),
        }
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            budget: match self.pod.ready_retries {
                0 => Budget::Unbounded,
                n => Budget::Bounded(n),
            },
            interval: Duration::from_secs(self.pod.ready_interval),
        }
    }

    /// Pods are reached as root with the configured key
    pub fn ssh_credential(&self) -> Credential {
        Credential::PrivateKey(expand_tilde(&self.ssh_private_key))
    }
}

/// `skypilot:` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkyPilotConfig {
    /// Cluster name; `benchmaq-<hex>` when unset
    #[serde(default)]
    pub name: Option<String>,
    /// Passed through as the task's `resources`
    #[serde(default)]
    pub resources: serde_yaml::Value,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default)]
    pub ssh_private_key: Option<String>,
}

impl SkyPilotConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.resources.is_null() || self.resources.is_mapping()) {
            return Err(Error::config("skypilot.resources must be a mapping"));
        }
        Ok(())
    }

    pub fn spec(&self) -> SkyPilotSpec {
        let name = self
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(default_cluster_name);
        SkyPilotSpec {
            name,
            resources: self.resources.clone(),
            envs: self.envs.clone(),
        }
    }

    /// Explicit key, or whatever SkyPilot wrote into `~/.ssh/config`
    pub fn ssh_credential(&self) -> Credential {
        match &self.ssh_private_key {
            Some(key) => Credential::PrivateKey(expand_tilde(key)),
            None => Credential::SshConfig,
        }
    }
}

impl RunConfig {
    /// Parse a configuration document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))
    }

    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validate every section present
    pub fn validate(&self) -> Result<()> {
        self.logging.validate()?;
        self.runtime.validate()?;

        let plan = self.to_plan()?;
        if !plan.entries.iter().any(|e| e.is_runnable()) {
            return Err(Error::config("configuration has no runnable plan entries"));
        }

        if let Some(remote) = &self.remote {
            remote.validate()?;
        }
        if let Some(runpod) = &self.runpod {
            runpod.validate()?;
        }
        if let Some(skypilot) = &self.skypilot {
            skypilot.validate()?;
        }
        Ok(())
    }

    pub fn to_plan(&self) -> Result<BenchmarkPlan> {
        self.plan.to_plan()
    }

    /// Environment materialized on remote and cloud hosts
    pub fn environment(&self) -> EnvironmentSpec {
        self.remote
            .as_ref()
            .map(RemoteConfig::environment)
            .unwrap_or_default()
    }

    /// Binary shipped to remote and cloud hosts
    pub fn remote_binary(&self) -> Result<PathBuf> {
        match self.remote.as_ref().and_then(|r| r.binary.as_deref()) {
            Some(binary) => Ok(expand_tilde(binary)),
            None => std::env::current_exe()
                .map_err(|e| Error::config(format!("Cannot locate the running executable: {}", e))),
        }
    }

    pub fn runpod(&self) -> Result<&RunPodConfig> {
        self.runpod
            .as_ref()
            .ok_or_else(|| Error::config("configuration has no `runpod` section"))
    }

    pub fn skypilot(&self) -> Result<&SkyPilotConfig> {
        self.skypilot
            .as_ref()
            .ok_or_else(|| Error::config("configuration has no `skypilot` section"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PLAN: &str = r#"
benchmark:
  - name: llama
    serve:
      model: meta-llama/Llama-3.1-8B
      port: 8000
    bench:
      - random_input_len: 1024
        random_output_len: 128
        num_prompts: 10
        max_concurrency: 4
    results:
      save_result: true
      result_dir: ./benchmark_results
"#;

    fn with_plan(extra: &str) -> RunConfig {
        RunConfig::from_yaml_str(&format!("{}{}", PLAN, extra)).unwrap()
    }

    #[test]
    fn test_local_config_defaults() {
        let config = with_plan("");
        config.validate().unwrap();
        assert!(config.remote.is_none());
        assert_eq!(config.runtime, RuntimeConfig::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.to_plan().unwrap().entries[0].name, "llama");
        assert_eq!(config.environment(), EnvironmentSpec::default());
    }

    #[test]
    fn test_remote_section() {
        let config = with_plan(
            r#"
remote:
  host: 10.0.0.5
  port: 2222
  key_filename: /keys/id_ed25519
  uv:
    python_version: "3.12"
  dependencies: [vllm]
"#,
        );
        config.validate().unwrap();

        let remote = config.remote.as_ref().unwrap();
        let endpoint = remote.endpoint();
        assert_eq!(endpoint.to_string(), "root@10.0.0.5:2222");
        assert_eq!(endpoint.credential, Credential::PrivateKey("/keys/id_ed25519".into()));

        let env = config.environment();
        assert_eq!(env.path, "~/.benchmark-venv");
        assert_eq!(env.python_version, "3.12");
        assert_eq!(env.dependencies, vec!["vllm"]);
    }

    /// A directory holding an executable `sshpass`
    fn sshpass_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sshpass");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    }

    #[test]
    fn test_remote_requires_credentials() {
        let bin = sshpass_dir();
        let mut remote = RemoteConfig::new("gpu-box");
        assert!(remote.validate_with_path(bin.path().as_os_str()).is_err());
        remote.password = Some("secret".into());
        remote.key_filename = Some("/keys/id".into());
        remote.validate_with_path(bin.path().as_os_str()).unwrap();
        assert_eq!(remote.credential(), Credential::Password("secret".into()));
    }

    #[test]
    fn test_password_without_sshpass_is_config_error() {
        let empty = tempfile::tempdir().unwrap();
        let mut remote = RemoteConfig::new("gpu-box");
        remote.password = Some("secret".into());

        let err = remote.validate_with_path(empty.path().as_os_str()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert!(err.to_string().contains("sshpass"));

        remote.password = None;
        remote.key_filename = Some("/keys/id".into());
        remote.validate_with_path(empty.path().as_os_str()).unwrap();
    }

    #[test]
    fn test_runpod_section() {
        let config = with_plan(
            r#"
runpod:
  runpod_api_key: rp_test
  ssh_private_key: /keys/pod
  pod:
    gpu_type: NVIDIA H100 80GB HBM3
    gpu_count: 2
    instance_type: on-demand
    deploy_retries: 3
    ready_retries: 0
  container:
    image: vllm/vllm-openai:latest
  ports:
    http: [8000]
  env:
    HF_TOKEN: hf_x
"#,
        );
        config.validate().unwrap();

        let runpod = config.runpod().unwrap();
        let spec = runpod.pod_spec();
        assert_eq!(spec.display_name(), "NVIDIA_H100_80GB_HBM3_2");
        assert_eq!(spec.instance_type, InstanceType::OnDemand);
        assert_eq!(spec.container_disk_gb, 20);
        assert_eq!(spec.volume_mount_path, "/workspace");
        assert_eq!(spec.ports, vec!["8000/http", "22/tcp"]);
        assert_eq!(spec.env.get("HF_TOKEN").map(String::as_str), Some("hf_x"));

        assert_eq!(runpod.retry_policy().attempts, 3);
        assert_eq!(runpod.retry_policy().interval, Duration::from_secs(30));
        assert_eq!(runpod.wait_policy().budget, Budget::Unbounded);
        assert_eq!(runpod.ssh_credential(), Credential::PrivateKey("/keys/pod".into()));
    }

    #[test]
    fn test_runpod_missing_fields_fail_validation() {
        let config = with_plan(
            r#"
runpod:
  runpod_api_key: rp_test
  container:
    image: vllm/vllm-openai:latest
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gpu_type"));

        let config = with_plan(
            r#"
runpod:
  runpod_api_key: rp_test
  pod:
    gpu_type: NVIDIA A40
"#,
        );
        assert!(config.validate().unwrap_err().to_string().contains("image"));
    }

    #[test]
    fn test_runpod_defaults() {
        let runpod = RunPodConfig::default();
        assert_eq!(runpod.retry_policy().attempts, 10);
        assert_eq!(runpod.wait_policy().budget, Budget::Bounded(60));
        assert_eq!(runpod.wait_policy().interval, Duration::from_secs(10));
        assert!(runpod.ssh_private_key.ends_with(".ssh/id_ed25519"));
    }

    #[test]
    fn test_skypilot_section() {
        let config = with_plan(
            r#"
skypilot:
  resources:
    accelerators: H100:1
  envs:
    HF_TOKEN: hf_x
  ssh_user: ubuntu
"#,
        );
        config.validate().unwrap();

        let sky = config.skypilot().unwrap();
        let spec = sky.spec();
        assert!(spec.name.starts_with("benchmaq-"));
        assert_eq!(spec.resources["accelerators"].as_str(), Some("H100:1"));
        assert_eq!(sky.ssh_credential(), Credential::SshConfig);

        let bad = SkyPilotConfig {
            resources: serde_yaml::Value::String("H100".into()),
            ..SkyPilotConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let config = RunConfig::from_yaml_str("logging:\n  level: debug\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_logging_is_rejected() {
        let config = with_plan("logging:\n  level: loud\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bench.yaml");
        std::fs::write(&path, PLAN).unwrap();

        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.plan.benchmark.len(), 1);
        assert!(RunConfig::from_file(temp_dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/key"), PathBuf::from("/abs/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/.ssh/id"), home.join(".ssh/id"));
        }
    }
}
