//! RunPod provisioner
//!
//! Talks to RunPod's GraphQL API. Every request carries the [`RunPodCredential`]
//! the client was built with; there is no process-wide key.

use async_trait::async_trait;
use bench_core::{CloudProvisioner, ComputeInstance, Error, InstanceStatus, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const RUNPOD_API_URL: &str = "https://api.runpod.io/graphql";
pub const DEFAULT_PORTS: &[&str] = &["8888/http", "8000/http", "22/tcp"];

/// Provider messages that mean "try again later", matched case-insensitively
const CAPACITY_MARKERS: &[&str] = &["no longer available", "could not be created"];

const POD_FIELDS: &str = "id name desiredStatus costPerHr machine { gpuDisplayName } \
                          runtime { ports { ip isIpPublic privatePort publicPort type } }";

/// API key for one RunPod account
#[derive(Clone)]
pub struct RunPodCredential {
    api_key: String,
}

impl RunPodCredential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Explicit key first, then `RUNPOD_API_KEY`
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        explicit
            .map(str::to_string)
            .or_else(|| std::env::var("RUNPOD_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| {
                Error::config(
                    "RunPod API key not found. Set `runpod.runpod_api_key` or RUNPOD_API_KEY",
                )
            })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

impl fmt::Debug for RunPodCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RunPodCredential(***)")
    }
}

/// Spot (interruptible, bid-priced) or on-demand capacity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceType {
    #[default]
    Spot,
    OnDemand,
}

/// Pod creation request
#[derive(Debug, Clone, PartialEq)]
pub struct PodSpec {
    /// Display name; derived from the GPU type and count when unset
    pub name: Option<String>,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub instance_type: InstanceType,
    /// Per-GPU bid for spot pods; the current minimum bid when unset
    pub bid_per_gpu: Option<f64>,
    pub secure_cloud: bool,
    pub image: String,
    pub container_disk_gb: u32,
    pub volume_gb: Option<u32>,
    pub volume_mount_path: String,
    pub ports: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl PodSpec {
    pub fn new(gpu_type: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: None,
            gpu_type: gpu_type.into(),
            gpu_count: 1,
            instance_type: InstanceType::Spot,
            bid_per_gpu: None,
            secure_cloud: true,
            image: image.into(),
            container_disk_gb: 20,
            volume_gb: None,
            volume_mount_path: "/workspace".to_string(),
            ports: DEFAULT_PORTS.iter().map(|p| p.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}_{}", self.gpu_type, self.gpu_count).replace(' ', "_"),
        }
    }

    fn cloud_type(&self) -> &'static str {
        if self.secure_cloud {
            "SECURE"
        } else {
            "ALL"
        }
    }
}

/// Quote a value as a GraphQL string literal
fn literal(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn env_literal(env: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = env
        .iter()
        .map(|(k, v)| format!("{{ key: {}, value: {} }}", literal(k), literal(v)))
        .collect();
    format!("[{}]", pairs.join(", "))
}

/// Creation mutation; `bid` selects the interruptible (spot) variant
pub fn deploy_mutation(spec: &PodSpec, bid: Option<f64>) -> String {
    let mut fields = Vec::new();
    let operation = match bid {
        Some(bid) => {
            fields.push(format!("bidPerGpu: {}", bid));
            "podRentInterruptable"
        }
        None => "podFindAndDeployOnDemand",
    };
    fields.push(format!("cloudType: {}", spec.cloud_type()));
    fields.push(format!("gpuCount: {}", spec.gpu_count));
    fields.push(format!("volumeInGb: {}", spec.volume_gb.unwrap_or(0)));
    fields.push(format!("containerDiskInGb: {}", spec.container_disk_gb));
    fields.push(format!("gpuTypeId: {}", literal(&spec.gpu_type)));
    fields.push(format!("name: {}", literal(&spec.display_name())));
    fields.push(format!("imageName: {}", literal(&spec.image)));
    fields.push(format!("ports: {}", literal(&spec.ports.join(","))));
    fields.push(format!("volumeMountPath: {}", literal(&spec.volume_mount_path)));
    fields.push("startSsh: true".to_string());
    fields.push(format!("env: {}", env_literal(&spec.env)));

    format!(
        "mutation {{ {}(input: {{ {} }}) {{ id imageName machineId }} }}",
        operation,
        fields.join(", ")
    )
}

pub fn minimum_bid_query(gpu_type: &str, secure_cloud: bool) -> String {
    format!(
        "query {{ gpuTypes(input: {{ id: {} }}) {{ id lowestPrice(input: {{ gpuCount: 1, secureCloud: {} }}) {{ minimumBidPrice }} }} }}",
        literal(gpu_type),
        secure_cloud
    )
}

pub fn pod_query(id: &str) -> String {
    format!("query {{ pod(input: {{ podId: {} }}) {{ {} }} }}", literal(id), POD_FIELDS)
}

pub fn pods_query() -> String {
    format!("query {{ myself {{ pods {{ {} }} }} }}", POD_FIELDS)
}

pub fn terminate_mutation(id: &str) -> String {
    format!("mutation {{ podTerminate(input: {{ podId: {} }}) }}", literal(id))
}

/// Map a provider error message onto the error taxonomy
pub fn classify_provider_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if CAPACITY_MARKERS.iter().any(|m| lower.contains(m)) {
        Error::capacity_unavailable(message)
    } else if lower.contains("not found") || lower.contains("does not exist") {
        Error::not_found(message)
    } else {
        Error::provider(message)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pod {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    desired_status: Option<String>,
    #[serde(default)]
    cost_per_hr: Option<f64>,
    #[serde(default)]
    machine: Option<Machine>,
    #[serde(default)]
    runtime: Option<PodRuntime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Machine {
    #[serde(default)]
    gpu_display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PodRuntime {
    #[serde(default)]
    ports: Option<Vec<PortMapping>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortMapping {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    is_ip_public: Option<bool>,
    #[serde(default)]
    private_port: Option<u16>,
    #[serde(default)]
    public_port: Option<u16>,
}

impl Pod {
    /// Public mapping of container port 22, preferring public IPs
    fn ssh_mapping(&self) -> Option<(String, u16)> {
        let ports = self.runtime.as_ref()?.ports.as_ref()?;
        let mut candidates: Vec<&PortMapping> = ports
            .iter()
            .filter(|p| p.private_port == Some(22) && p.ip.is_some() && p.public_port.is_some())
            .collect();
        candidates.sort_by_key(|p| !p.is_ip_public.unwrap_or(false));
        let mapping = candidates.first()?;
        Some((mapping.ip.clone()?, mapping.public_port?))
    }

    fn into_instance(self) -> ComputeInstance {
        let ssh = self.ssh_mapping();
        let status = self
            .desired_status
            .as_deref()
            .map(InstanceStatus::parse)
            .unwrap_or(InstanceStatus::Unknown);
        let mut instance = ComputeInstance::new(self.id, self.name.unwrap_or_default(), status);
        if let Some((ip, port)) = ssh {
            instance = instance.with_ssh(ip, port);
        }
        instance.gpu_type = self.machine.and_then(|m| m.gpu_display_name);
        instance.cost_per_hr = self.cost_per_hr;
        instance
    }
}

fn parse_pod(value: &Value) -> Result<Option<ComputeInstance>> {
    if value.is_null() {
        return Ok(None);
    }
    let pod: Pod = serde_json::from_value(value.clone())?;
    Ok(Some(pod.into_instance()))
}

/// Client for the RunPod GraphQL API
#[derive(Debug, Clone)]
pub struct RunPodClient {
    client: Client,
    endpoint: String,
    credential: RunPodCredential,
}

impl RunPodClient {
    pub fn new(credential: RunPodCredential) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: RUNPOD_API_URL.to_string(),
            credential,
        })
    }

    /// Point the client at a different API URL
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Run one GraphQL document and return its `data` member
    pub async fn query(&self, document: &str) -> Result<Value> {
        debug!("RunPod request: {}", document);

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, self.credential.bearer())
            .json(&serde_json::json!({ "query": document }))
            .send()
            .await
            .map_err(|e| Error::network(format!("RunPod request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::provider(format!("RunPod rejected the API key ({})", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::network(format!("Failed to read RunPod response: {}", e)))?;
        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(Error::provider(format!("RunPod request failed: {} - {}", status, text)))
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(message) = body
            .get("errors")
            .and_then(|errors| errors.get(0))
            .map(|error| {
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string()
            })
        {
            return Err(classify_provider_error(&message));
        }

        if !status.is_success() {
            return Err(Error::provider(format!("RunPod request failed: {} - {}", status, text)));
        }

        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Current minimum per-GPU spot bid
    pub async fn minimum_bid(&self, gpu_type: &str, secure_cloud: bool) -> Result<Option<f64>> {
        let data = self.query(&minimum_bid_query(gpu_type, secure_cloud)).await?;
        Ok(data
            .get("gpuTypes")
            .and_then(|types| types.get(0))
            .and_then(|t| t.get("lowestPrice"))
            .and_then(|p| p.get("minimumBidPrice"))
            .and_then(Value::as_f64))
    }

    /// Explicit bid, else the market minimum, else zero
    async fn resolve_bid(&self, spec: &PodSpec) -> f64 {
        if let Some(bid) = spec.bid_per_gpu {
            return bid;
        }
        match self.minimum_bid(&spec.gpu_type, spec.secure_cloud).await {
            Ok(Some(bid)) => {
                info!("Using spot instance with minimum bid: ${}/GPU/hour", bid);
                bid
            }
            Ok(None) => {
                warn!("No minimum bid reported for {}, bidding 0", spec.gpu_type);
                0.0
            }
            Err(e) => {
                warn!("Minimum bid query failed for {}, bidding 0: {}", spec.gpu_type, e);
                0.0
            }
        }
    }
}

#[async_trait]
impl CloudProvisioner for RunPodClient {
    type Spec = PodSpec;

    async fn create(&self, spec: &PodSpec) -> Result<ComputeInstance> {
        let (operation, mutation) = match spec.instance_type {
            InstanceType::Spot => {
                let bid = self.resolve_bid(spec).await;
                ("podRentInterruptable", deploy_mutation(spec, Some(bid)))
            }
            InstanceType::OnDemand => {
                info!("Using on-demand instance");
                ("podFindAndDeployOnDemand", deploy_mutation(spec, None))
            }
        };

        let data = self.query(&mutation).await?;
        let id = data
            .get(operation)
            .and_then(|pod| pod.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::provider(format!("{} returned no pod id", operation)))?;

        info!("Pod created: {} ({})", id, spec.display_name());
        let mut instance = ComputeInstance::new(id, spec.display_name(), InstanceStatus::Created);
        instance.gpu_type = Some(spec.gpu_type.clone());
        Ok(instance)
    }

    async fn find(&self, id: &str) -> Result<Option<ComputeInstance>> {
        let data = match self.query(&pod_query(id)).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        parse_pod(data.get("pod").unwrap_or(&Value::Null))
    }

    async fn list(&self) -> Result<Vec<ComputeInstance>> {
        let data = self.query(&pods_query()).await?;
        let pods = data
            .get("myself")
            .and_then(|m| m.get("pods"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut instances = Vec::with_capacity(pods.len());
        for pod in &pods {
            if let Some(instance) = parse_pod(pod)? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    async fn terminate(&self, id: &str) -> Result<()> {
        self.query(&terminate_mutation(id)).await?;
        info!("Terminated pod {}", id);
        Ok(())
    }
}
