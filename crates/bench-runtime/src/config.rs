//! Configuration for the local execution side

use bench_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `runtime:` section of the configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Seconds between health probes
    pub health_check_interval_secs: u64,

    /// Health probes before giving up, 0 means poll until healthy
    pub health_check_max_attempts: u32,

    /// Per-request timeout of a health probe
    pub health_request_timeout_secs: u64,

    /// Grace period after the interrupt signal before force-killing
    pub shutdown_timeout_secs: u64,

    /// One-second bind probes before assuming the port will not be released
    pub port_release_attempts: u32,

    /// Settle time between plan entries
    pub inter_entry_delay_secs: u64,

    /// Benchmark output lines containing this marker are left out of persisted logs
    pub log_filter_marker: String,

    /// External tool names
    pub binaries: EngineBinaries,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 5,
            health_check_max_attempts: 200,
            health_request_timeout_secs: 5,
            shutdown_timeout_secs: 30,
            port_release_attempts: 30,
            inter_entry_delay_secs: 5,
            log_filter_marker: "(APIServer)".to_string(),
            binaries: EngineBinaries::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.health_check_interval_secs == 0 {
            return Err(Error::config("health_check_interval_secs must be greater than 0"));
        }
        if self.health_request_timeout_secs == 0 {
            return Err(Error::config("health_request_timeout_secs must be greater than 0"));
        }
        Ok(())
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            interval: Duration::from_secs(self.health_check_interval_secs),
            max_attempts: (self.health_check_max_attempts > 0)
                .then_some(self.health_check_max_attempts),
            request_timeout: Duration::from_secs(self.health_request_timeout_secs),
        }
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            health: self.health_policy(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            port_release_attempts: self.port_release_attempts,
            port_release_interval: Duration::from_secs(1),
            binaries: self.binaries.clone(),
        }
    }

    pub fn inter_entry_delay(&self) -> Duration {
        Duration::from_secs(self.inter_entry_delay_secs)
    }

    /// How long an interrupted remote plan gets to stop its server and report
    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs + u64::from(self.port_release_attempts) + 30)
    }
}

/// Names of the external tools, overridable for non-standard installs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineBinaries {
    pub vllm: String,
    pub python: String,
    pub downloader: String,
}

impl Default for EngineBinaries {
    fn default() -> Self {
        Self {
            vllm: "vllm".to_string(),
            python: "python".to_string(),
            downloader: "huggingface-cli".to_string(),
        }
    }
}

/// Health polling bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    pub interval: Duration,
    /// `None` polls until the server answers or exits
    pub max_attempts: Option<u32>,
    pub request_timeout: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        RuntimeConfig::default().health_policy()
    }
}

/// Everything a process supervisor needs
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub health: HealthPolicy,
    pub shutdown_timeout: Duration,
    pub port_release_attempts: u32,
    pub port_release_interval: Duration,
    pub binaries: EngineBinaries,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        RuntimeConfig::default().supervisor()
    }
}
