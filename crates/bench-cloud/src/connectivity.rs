//! Waiting for a fresh instance to accept SSH sessions
//!
//! Providers publish a port mapping before the guest's SSH daemon is listening,
//! so readiness needs both: a RUNNING instance with a mapped SSH port, and a
//! handshake that actually completes against it.

use bench_core::{CloudProvisioner, ConnectionEndpoint, Credential, HandshakeProbe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many polls the waiter may spend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Bounded(u32),
    Unbounded,
}

impl Budget {
    fn exhausted(&self, attempts: u32) -> bool {
        match self {
            Budget::Bounded(max) => attempts >= *max,
            Budget::Unbounded => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub budget: Budget,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            budget: Budget::Bounded(60),
            interval: Duration::from_secs(10),
        }
    }
}

/// Outcome of a wait; `endpoint` is set exactly when `ready` is
#[derive(Debug, Clone, PartialEq)]
pub struct Readiness {
    pub ready: bool,
    pub endpoint: Option<ConnectionEndpoint>,
    pub attempts: u32,
}

/// Polls a provider and probes SSH until an instance is reachable
pub struct ConnectivityWaiter {
    probe: Arc<dyn HandshakeProbe>,
    policy: WaitPolicy,
}

impl ConnectivityWaiter {
    pub fn new(probe: Arc<dyn HandshakeProbe>, policy: WaitPolicy) -> Self {
        Self { probe, policy }
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Wait for `instance_id` to become reachable with `credential`.
    ///
    /// Running out of budget yields `ready: false`; the caller decides whether
    /// that is fatal.
    pub async fn wait<P>(
        &self,
        provisioner: &P,
        instance_id: &str,
        credential: &Credential,
        username: Option<&str>,
    ) -> Readiness
    where
        P: CloudProvisioner + ?Sized,
    {
        info!("Waiting for SSH on instance {}", instance_id);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            match provisioner.find(instance_id).await {
                Err(e) => warn!("Status query for {} failed: {}", instance_id, e),
                Ok(None) => debug!("Instance {} not visible yet", instance_id),
                Ok(Some(instance)) if !instance.is_running() => {
                    info!("  Instance status: {}", instance.status);
                }
                Ok(Some(instance)) => match instance.ssh {
                    None => info!("  Instance running, waiting for network info..."),
                    Some(ssh) => {
                        let mut endpoint = ConnectionEndpoint::new(ssh.ip, ssh.port, credential.clone());
                        if let Some(user) = username {
                            endpoint = endpoint.with_username(user);
                        }

                        if self.probe.handshake(&endpoint).await {
                            info!("SSH ready: {}", endpoint);
                            return Readiness {
                                ready: true,
                                endpoint: Some(endpoint),
                                attempts,
                            };
                        }
                        info!("  SSH not ready yet on {}, retrying...", endpoint);
                    }
                },
            }

            if self.policy.budget.exhausted(attempts) {
                warn!(
                    "Instance {} not reachable after {} attempts",
                    instance_id, attempts
                );
                return Readiness {
                    ready: false,
                    endpoint: None,
                    attempts,
                };
            }

            tokio::time::sleep(self.policy.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::{ComputeInstance, InstanceStatus};
    use bench_dev::{CallLog, MockProbe, MockProvisioner};
    use std::path::PathBuf;

    fn fast(budget: Budget) -> WaitPolicy {
        WaitPolicy {
            budget,
            interval: Duration::from_millis(5),
        }
    }

    fn running() -> ComputeInstance {
        ComputeInstance::new("pod-1", "bench", InstanceStatus::Running).with_ssh("203.0.113.7", 40122)
    }

    fn key() -> Credential {
        Credential::PrivateKey(PathBuf::from("/home/me/.ssh/id_ed25519"))
    }

    #[tokio::test]
    async fn test_waits_through_status_network_and_handshake() {
        let log = CallLog::new();
        let provisioner = MockProvisioner::new(log.clone())
            .with_instance(running())
            .with_readiness([
                ComputeInstance::new("", "bench", InstanceStatus::Created),
                ComputeInstance::new("", "bench", InstanceStatus::Running),
            ]);
        let probe = MockProbe::new(log.clone()).failing_first(1);
        let waiter = ConnectivityWaiter::new(Arc::new(probe), fast(Budget::Bounded(10)));

        let readiness = waiter.wait(&provisioner, "pod-1", &key(), Some("root")).await;

        assert!(readiness.ready);
        assert_eq!(readiness.attempts, 4);
        let endpoint = readiness.endpoint.unwrap();
        assert_eq!(endpoint.to_string(), "root@203.0.113.7:40122");
        assert_eq!(endpoint.credential, key());
        assert_eq!(log.kinds(), ["handshake-failed", "wait-ready"]);
    }

    #[tokio::test]
    async fn test_bounded_budget_gives_up() {
        let log = CallLog::new();
        let provisioner = MockProvisioner::new(log.clone()).with_instance(running());
        let probe = MockProbe::new(log.clone()).failing_first(100);
        let waiter = ConnectivityWaiter::new(Arc::new(probe), fast(Budget::Bounded(3)));

        let readiness = waiter.wait(&provisioner, "pod-1", &key(), None).await;

        assert!(!readiness.ready);
        assert!(readiness.endpoint.is_none());
        assert_eq!(log.count("handshake-failed"), 3);
    }

    #[tokio::test]
    async fn test_missing_instance_never_probes() {
        let log = CallLog::new();
        let provisioner = MockProvisioner::new(log.clone());
        let waiter = ConnectivityWaiter::new(Arc::new(MockProbe::new(log.clone())), fast(Budget::Bounded(2)));

        let readiness = waiter.wait(&provisioner, "ghost", &key(), None).await;
        assert!(!readiness.ready);
        assert_eq!(readiness.attempts, 2);
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_budget_exhaustion() {
        assert!(Budget::Bounded(60).exhausted(60));
        assert!(!Budget::Bounded(60).exhausted(59));
        assert!(!Budget::Unbounded.exhausted(u32::MAX));
        assert_eq!(WaitPolicy::default().budget, Budget::Bounded(60));
    }
}
