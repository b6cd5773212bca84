//! Creation with bounded retry on transient capacity errors

use bench_core::{CloudProvisioner, ComputeInstance, Error, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fixed-interval retry budget for instance creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total creation attempts, including the first
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(30),
        }
    }
}

/// Create an instance, retrying only while the provider reports capacity as
/// temporarily unavailable.
///
/// Any other provider error returns on the spot. A creation request that is in
/// flight always runs to completion so its instance id is never lost; `cancel`
/// only cuts the waits between attempts short.
pub async fn create_with_retry<P>(
    provisioner: &P,
    spec: &P::Spec,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<ComputeInstance>
where
    P: CloudProvisioner + ?Sized,
{
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(Error::interrupted("cancelled before instance creation"));
        }

        match provisioner.create(spec).await {
            Ok(instance) => {
                if attempt > 1 {
                    info!("Instance {} created on attempt {}", instance.id, attempt);
                }
                return Ok(instance);
            }
            Err(e) if e.is_capacity_unavailable() => {
                if attempt == attempts {
                    return Err(Error::provider(format!(
                        "instance creation failed after {} attempts: {}",
                        attempts, e
                    )));
                }
                warn!(
                    "Deploy attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, attempts, e, policy.interval
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(Error::interrupted("cancelled while waiting to retry instance creation"));
                    }
                    _ = tokio::time::sleep(policy.interval) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::provider("instance creation was never attempted"))
}
