//! Core traits for benchmaq components
//!
//! These traits define the seams between the orchestration logic and the things it
//! drives: serving processes, load generators, cloud providers, SSH transports and
//! artifact collection. Production implementations live in the runtime, cloud and
//! remote crates; `bench-dev` provides scripted mocks.

use crate::types::{
    BenchmarkPlan, CollectionReport, ComputeInstance, ConnectionEndpoint, ModelDownload,
    PlanEntry, PlanReport, ResultArtifact, TrialSpec,
};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns at most one model-serving process at a time
#[async_trait]
pub trait ServerSupervisor: Send + Sync {
    /// Launch the server for `entry` and poll its health endpoint.
    ///
    /// `Ok(false)` means the server never became healthy within the configured
    /// bound. Callers treat that as fatal for the entry.
    async fn start(&mut self, entry: &PlanEntry) -> Result<bool>;

    /// Interrupt, wait, force-kill if needed, then confirm the port is free.
    /// A no-op when nothing is running.
    async fn stop(&mut self) -> Result<()>;
}

/// Runs one benchmark subprocess against a live server
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    async fn run_trial(
        &self,
        entry: &PlanEntry,
        trial: &TrialSpec,
        result_name: &str,
    ) -> Result<ResultArtifact>;
}

/// Materializes model weights before a server starts
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn fetch(&self, download: &ModelDownload) -> Result<()>;
}

/// Control-plane operations of a GPU cloud provider
#[async_trait]
pub trait CloudProvisioner: Send + Sync {
    /// Provider-specific creation request
    type Spec: Send + Sync;

    /// Create an instance. Returns as soon as the provider has assigned an id.
    async fn create(&self, spec: &Self::Spec) -> Result<ComputeInstance>;

    /// Look an instance up by id
    async fn find(&self, id: &str) -> Result<Option<ComputeInstance>>;

    /// All instances visible to the credential
    async fn list(&self) -> Result<Vec<ComputeInstance>>;

    /// Terminate an instance by id
    async fn terminate(&self, id: &str) -> Result<()>;

    /// Look an instance up by display name
    async fn find_by_name(&self, name: &str) -> Result<Option<ComputeInstance>> {
        Ok(self.list().await?.into_iter().find(|i| i.name == name))
    }

    /// Destroy an instance given its id or its display name.
    ///
    /// An instance that no longer exists counts as destroyed.
    async fn destroy(&self, id_or_name: &str) -> Result<()> {
        let instance = match self.find(id_or_name).await? {
            Some(instance) => Some(instance),
            None => self.find_by_name(id_or_name).await?,
        };

        let Some(instance) = instance else {
            warn!("Instance {} not found, nothing to destroy", id_or_name);
            return Ok(());
        };

        match self.terminate(&instance.id).await {
            Ok(()) => {
                info!("Destroyed instance {} ({})", instance.name, instance.id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!("Instance {} already gone: {}", instance.id, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Confirms an SSH daemon actually answers, not just that a port is mapped
#[async_trait]
pub trait HandshakeProbe: Send + Sync {
    async fn handshake(&self, endpoint: &ConnectionEndpoint) -> bool;
}

/// Executes a benchmark plan on a remote host inside a prepared environment
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    /// Run `plan` to completion. When `cancel` fires, the remote side is told
    /// to stop and the partial report it sends back is returned, marked
    /// interrupted.
    async fn execute(
        &self,
        endpoint: &ConnectionEndpoint,
        plan: &BenchmarkPlan,
        cancel: &CancellationToken,
    ) -> Result<PlanReport>;
}

/// Pulls result files back from a host. Never fails as a whole.
#[async_trait]
pub trait ArtifactCollector: Send + Sync {
    async fn collect(
        &self,
        endpoint: &ConnectionEndpoint,
        remote_dirs: &[String],
        local_dir: &Path,
    ) -> CollectionReport;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceStatus;
    use crate::Error;
    use std::sync::Mutex;

    struct StaticProvisioner {
        instances: Vec<ComputeInstance>,
        terminated: Mutex<Vec<String>>,
        terminate_error: Option<fn() -> Error>,
    }

    impl StaticProvisioner {
        fn new(instances: Vec<ComputeInstance>) -> Self {
            Self {
                instances,
                terminated: Mutex::new(Vec::new()),
                terminate_error: None,
            }
        }
    }

    #[async_trait]
    impl CloudProvisioner for StaticProvisioner {
        type Spec = ();

        async fn create(&self, _spec: &()) -> Result<ComputeInstance> {
            Err(Error::provider("not supported"))
        }

        async fn find(&self, id: &str) -> Result<Option<ComputeInstance>> {
            Ok(self.instances.iter().find(|i| i.id == id).cloned())
        }

        async fn list(&self) -> Result<Vec<ComputeInstance>> {
            Ok(self.instances.clone())
        }

        async fn terminate(&self, id: &str) -> Result<()> {
            if let Some(make_error) = self.terminate_error {
                return Err(make_error());
            }
            self.terminated.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn pods() -> Vec<ComputeInstance> {
        vec![
            ComputeInstance::new("pod-1", "H100_1", InstanceStatus::Running),
            ComputeInstance::new("pod-2", "A100_2", InstanceStatus::Exited),
        ]
    }

    #[tokio::test]
    async fn test_destroy_by_id() {
        let provisioner = StaticProvisioner::new(pods());
        provisioner.destroy("pod-2").await.unwrap();
        assert_eq!(*provisioner.terminated.lock().unwrap(), vec!["pod-2"]);
    }

    #[tokio::test]
    async fn test_destroy_by_name() {
        let provisioner = StaticProvisioner::new(pods());
        provisioner.destroy("H100_1").await.unwrap();
        assert_eq!(*provisioner.terminated.lock().unwrap(), vec!["pod-1"]);
    }

    #[tokio::test]
    async fn test_destroy_missing_is_success() {
        let provisioner = StaticProvisioner::new(pods());
        provisioner.destroy("pod-404").await.unwrap();
        assert!(provisioner.terminated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_not_found_from_provider_is_success() {
        let mut provisioner = StaticProvisioner::new(pods());
        provisioner.terminate_error = Some(|| Error::not_found("pod-1"));
        provisioner.destroy("pod-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_other_errors_propagate() {
        let mut provisioner = StaticProvisioner::new(pods());
        provisioner.terminate_error = Some(|| Error::provider("unauthorized"));
        let err = provisioner.destroy("pod-1").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn test_find_by_name_default() {
        let provisioner = StaticProvisioner::new(pods());
        let found = provisioner.find_by_name("A100_2").await.unwrap();
        assert_eq!(found.map(|i| i.id), Some("pod-2".to_string()));
    }
}
