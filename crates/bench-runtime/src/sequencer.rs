//! Trial sequencing
//!
//! Walks a benchmark plan strictly in order. For each entry: fetch weights if
//! needed, start the server, run every trial against it, and always stop the
//! server (port release confirmed) before the next entry begins.

use crate::benchmark::BenchmarkRunner;
use crate::config::RuntimeConfig;
use crate::download::HfDownloader;
use crate::process::ProcessSupervisor;
use bench_core::{
    result_name, BenchmarkPlan, Error, LoadGenerator, ModelFetcher, PlanEntry, PlanReport, Result,
    ServerSupervisor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives supervisor start/stop cycles and trial runs for a plan
pub struct TrialSequencer {
    supervisor: Box<dyn ServerSupervisor>,
    generator: Arc<dyn LoadGenerator>,
    fetcher: Arc<dyn ModelFetcher>,
    inter_entry_delay: Duration,
}

impl TrialSequencer {
    pub fn new(
        supervisor: Box<dyn ServerSupervisor>,
        generator: Arc<dyn LoadGenerator>,
        fetcher: Arc<dyn ModelFetcher>,
    ) -> Self {
        Self {
            supervisor,
            generator,
            fetcher,
            inter_entry_delay: Duration::from_secs(5),
        }
    }

    /// Sequencer backed by real processes on this host
    pub fn local(config: &RuntimeConfig) -> Result<Self> {
        let supervisor = ProcessSupervisor::new(config.supervisor())?;
        Ok(Self::new(
            Box::new(supervisor),
            Arc::new(BenchmarkRunner::new(config)),
            Arc::new(HfDownloader::new(&config.binaries)),
        )
        .with_inter_entry_delay(config.inter_entry_delay()))
    }

    pub fn with_inter_entry_delay(mut self, delay: Duration) -> Self {
        self.inter_entry_delay = delay;
        self
    }

    /// Run every runnable entry of `plan`.
    ///
    /// Failures are recorded in the report rather than returned; one failing
    /// entry or trial never prevents later entries from running. Cancelling
    /// `cancel` abandons the current download, health wait or trial, stops the
    /// server as usual, and returns what finished so far marked as interrupted.
    pub async fn run(&mut self, plan: &BenchmarkPlan, cancel: &CancellationToken) -> PlanReport {
        let mut report = PlanReport::default();
        let mut ran_any = false;

        for entry in &plan.entries {
            if !entry.is_runnable() {
                debug!("Skipping plan entry with empty name or model");
                continue;
            }
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            if ran_any && !self.inter_entry_delay.is_zero() {
                debug!("Waiting {:?} before next entry", self.inter_entry_delay);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.inter_entry_delay) => {}
                }
            }
            ran_any = true;

            self.run_entry(entry, &mut report, cancel).await;
            if report.interrupted {
                break;
            }
        }

        if report.interrupted {
            warn!(
                "Plan interrupted: {} results, {} failures",
                report.artifacts.len(),
                report.failures.len()
            );
        } else {
            info!(
                "Plan finished: {} results, {} failures",
                report.artifacts.len(),
                report.failures.len()
            );
        }
        report
    }

    async fn run_entry(&mut self, entry: &PlanEntry, report: &mut PlanReport, cancel: &CancellationToken) {
        let rule = "=".repeat(64);
        println!();
        println!("{}", rule);
        println!("CONFIGURATION: {}", entry.name);
        println!("Engine: {}  Model: {}  Port: {}", entry.engine, entry.serve.model, entry.serve.port);
        println!("{}", rule);

        if let Some(download) = &entry.download {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Interrupted while downloading the model for {}", entry.name);
                    report.interrupted = true;
                    return;
                }
                fetched = self.fetcher.fetch(download) => fetched,
            };
            if let Err(e) = fetched {
                error!("Model download failed for {}: {}", entry.name, e);
                report.failures.push(format!("{}: model download failed: {}", entry.name, e));
                return;
            }
        }

        // The supervisor owns the child as soon as it is spawned, so abandoning
        // `start` mid health wait still leaves `stop` to shut it down.
        let started = tokio::select! {
            _ = cancel.cancelled() => None,
            started = self.supervisor.start(entry) => Some(started),
        };
        match started {
            None => {
                warn!("Interrupted while starting the server for {}", entry.name);
                report.interrupted = true;
                self.stop_server(entry, report).await;
                return;
            }
            Some(Ok(true)) => {}
            Some(Ok(false)) => {
                let e = Error::health_check("server never became healthy");
                error!("{} for {}, skipping its trials", e, entry.name);
                report.failures.push(format!("{}: {}", entry.name, e));
                self.stop_server(entry, report).await;
                return;
            }
            Some(Err(e)) => {
                error!("Server for {} failed to start: {}", entry.name, e);
                report.failures.push(format!("{}: server failed to start: {}", entry.name, e));
                self.stop_server(entry, report).await;
                return;
            }
        }

        let total = entry.trials.len();
        for (i, trial) in entry.trials.iter().enumerate() {
            let name = result_name(&entry.name, &trial.args);
            info!("Benchmark {}/{}: {}", i + 1, total, name);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                outcome = self.generator.run_trial(entry, trial, &name) => Some(outcome),
            };
            match outcome {
                Some(Ok(artifact)) => report.artifacts.push(artifact),
                Some(Err(e)) => {
                    warn!("Trial {} failed: {}", name, e);
                    report.failures.push(format!("{}: {}", name, e));
                }
                None => {
                    warn!("Trial {} interrupted", name);
                    report.interrupted = true;
                    break;
                }
            }
        }

        self.stop_server(entry, report).await;
    }

    async fn stop_server(&mut self, entry: &PlanEntry, report: &mut PlanReport) {
        if let Err(e) = self.supervisor.stop().await {
            error!("Failed to stop server for {}: {}", entry.name, e);
            report.failures.push(format!("{}: server stop failed: {}", entry.name, e));
        }
    }
}
