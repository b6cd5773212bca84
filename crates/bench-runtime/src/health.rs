//! Health polling for serving processes

use crate::config::HealthPolicy;
use bench_core::{Error, Result};
use reqwest::Client;
use tracing::{debug, info, warn};

/// Polls a server's health endpoint until it answers 2xx
pub struct HealthChecker {
    client: Client,
    policy: HealthPolicy,
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(policy: HealthPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(policy.request_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Single probe; connection errors and non-2xx both count as "not yet"
    pub async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health probe to {} failed: {}", url, e);
                false
            }
        }
    }

    /// Poll `url` until healthy, the attempt budget runs out, or `still_running`
    /// reports that the process died.
    pub async fn wait_until_healthy<F>(&self, url: &str, mut still_running: F) -> bool
    where
        F: FnMut() -> bool + Send,
    {
        match self.policy.max_attempts {
            Some(max) => info!(
                "Waiting for server at {} (max_attempts={}, interval={:?})",
                url, max, self.policy.interval
            ),
            None => info!(
                "Waiting for server at {} (unlimited attempts, interval={:?})",
                url, self.policy.interval
            ),
        }

        let mut attempt: u32 = 0;
        loop {
            if self.probe(url).await {
                info!("Server healthy after {} attempts", attempt + 1);
                return true;
            }

            if attempt % 10 == 0 {
                info!("Health check attempt {}...", attempt + 1);
            }
            attempt += 1;

            if let Some(max) = self.policy.max_attempts {
                if attempt >= max {
                    warn!("Server failed to become healthy after {} attempts", max);
                    return false;
                }
            }

            if !still_running() {
                warn!("Server process exited before becoming healthy");
                return false;
            }

            tokio::time::sleep(self.policy.interval).await;
        }
    }
}
