//! Supervision of the model-serving process

use crate::config::SupervisorConfig;
use crate::engine::{serve_command, CommandLine};
use crate::health::HealthChecker;
use async_trait::async_trait;
use bench_core::{Error, PlanEntry, Result, ServerSupervisor};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Owns at most one serving process and the port it binds
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    health: HealthChecker,
    child: Option<Child>,
    port: Option<u16>,
    start_time: Option<Instant>,
}

impl ProcessSupervisor {
    /// Create a new process supervisor
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let health = HealthChecker::new(config.health)?;
        Ok(Self {
            config,
            health,
            child: None,
            port: None,
            start_time: None,
        })
    }

    /// Check if the process is running
    pub fn is_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Get process uptime
    pub fn uptime(&self) -> Option<Duration> {
        self.start_time.map(|start| start.elapsed())
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Spawn `cmd` and wait for `health_url` to answer
    pub async fn launch(&mut self, cmd: &CommandLine, port: u16, health_url: &str) -> Result<bool> {
        if self.is_running() {
            return Err(Error::process(format!(
                "a server is already running on port {:?}",
                self.port
            )));
        }

        info!("Starting server: {}", cmd);

        // Server output goes straight to the terminal, it is not captured
        let child = cmd
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process(format!("Failed to spawn {}: {}", cmd.program, e)))?;

        self.child = Some(child);
        self.port = Some(port);
        self.start_time = Some(Instant::now());

        let child = &mut self.child;
        let healthy = self
            .health
            .wait_until_healthy(health_url, || {
                child
                    .as_mut()
                    .map_or(false, |c| matches!(c.try_wait(), Ok(None)))
            })
            .await;

        Ok(healthy)
    }

    /// Interrupt, wait, force-kill on timeout, then confirm the port is free
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let port = self.port.take();
        self.start_time = None;

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Server already exited with {}", status);
            }
            _ => {
                info!("Stopping server on port {:?}", port);
                self.interrupt(&child);

                match timeout(self.config.shutdown_timeout, child.wait()).await {
                    Ok(Ok(status)) => info!("Server stopped gracefully ({})", status),
                    Ok(Err(e)) => error!("Error waiting for server shutdown: {}", e),
                    Err(_) => {
                        warn!(
                            "Graceful shutdown timed out after {:?}, forcing kill",
                            self.config.shutdown_timeout
                        );
                        if let Err(e) = child.kill().await {
                            error!("Failed to kill server process: {}", e);
                        }
                    }
                }
            }
        }

        if let Some(port) = port {
            if !self.wait_for_port_release(port).await {
                warn!(
                    "Port {} still in use after {} checks",
                    port, self.config.port_release_attempts
                );
            }
        }

        Ok(())
    }

    fn interrupt(&self, child: &Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                match signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                    Ok(()) => debug!("Sent SIGINT to server process {}", pid),
                    Err(e) => warn!("Failed to send SIGINT: {}", e),
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child;
        }
    }

    /// Bind-and-release probe until the port is free or attempts run out
    pub async fn wait_for_port_release(&self, port: u16) -> bool {
        for attempt in 0..self.config.port_release_attempts.max(1) {
            if port_is_free(port).await {
                info!("Port {} released", port);
                return true;
            }
            debug!("Port {} still bound (check {})", port, attempt + 1);
            tokio::time::sleep(self.config.port_release_interval).await;
        }
        false
    }
}

/// True when a listener can bind `port` on all interfaces
pub async fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).await.is_ok()
}

#[async_trait]
impl ServerSupervisor for ProcessSupervisor {
    async fn start(&mut self, entry: &PlanEntry) -> Result<bool> {
        let cmd = serve_command(entry, &self.config.binaries);
        self.launch(&cmd, entry.serve.port, &entry.serve.health_url())
            .await
    }

    async fn stop(&mut self) -> Result<()> {
        self.shutdown().await
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!("ProcessSupervisor dropped with running server, killing it");
            if let Err(e) = child.start_kill() {
                error!("Failed to kill server during cleanup: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthPolicy;

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            health: HealthPolicy {
                interval: Duration::from_millis(20),
                max_attempts: Some(5),
                request_timeout: Duration::from_millis(200),
            },
            shutdown_timeout: Duration::from_millis(500),
            port_release_attempts: 5,
            port_release_interval: Duration::from_millis(20),
            ..SupervisorConfig::default()
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut supervisor = ProcessSupervisor::new(fast_config()).unwrap();
        supervisor.stop().await.unwrap();
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_unhealthy_process_reports_false() {
        let mut supervisor = ProcessSupervisor::new(fast_config()).unwrap();
        let port = free_port();
        let cmd = CommandLine::new("sleep").arg("30");
        let url = format!("http://127.0.0.1:{}/health", port);

        let healthy = supervisor.launch(&cmd, port, &url).await.unwrap();
        assert!(!healthy);
        assert!(supervisor.is_running());

        supervisor.stop().await.unwrap();
        assert!(!supervisor.is_running());
        assert!(supervisor.uptime().is_none());
    }

    #[tokio::test]
    async fn test_exited_process_ends_health_wait() {
        let mut config = fast_config();
        config.health.max_attempts = None;
        let mut supervisor = ProcessSupervisor::new(config).unwrap();
        let port = free_port();
        let cmd = CommandLine::new("true");
        let url = format!("http://127.0.0.1:{}/health", port);

        assert!(!supervisor.launch(&cmd, port, &url).await.unwrap());
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_sigint_ignored_falls_back_to_kill() {
        let mut supervisor = ProcessSupervisor::new(fast_config()).unwrap();
        let port = free_port();
        let cmd = CommandLine::new("sh").args(["-c", "trap '' INT; sleep 30"]);
        let url = format!("http://127.0.0.1:{}/health", port);

        let _ = supervisor.launch(&cmd, port, &url).await.unwrap();
        let started = Instant::now();
        supervisor.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_port_release_detection() {
        let supervisor = ProcessSupervisor::new(fast_config()).unwrap();
        let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(!supervisor.wait_for_port_release(port).await);
        drop(listener);
        assert!(supervisor.wait_for_port_release(port).await);
    }
}
