//! Benchmark trial runner
//!
//! Runs the engine's load generator for one trial, streams its output, and persists
//! the structured result plus a filtered console log when the results policy asks
//! for it.

use crate::config::{EngineBinaries, RuntimeConfig};
use crate::engine::{bench_command, structured_result_path};
use crate::stream::run_streaming;
use async_trait::async_trait;
use bench_core::{Error, LoadGenerator, PlanEntry, Result, ResultArtifact, TrialSpec};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const RULE_WIDTH: usize = 64;

/// Runs trials with the engine's own benchmark tool
pub struct BenchmarkRunner {
    binaries: EngineBinaries,
    log_filter: Option<String>,
}

impl BenchmarkRunner {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binaries: config.binaries.clone(),
            log_filter: Some(config.log_filter_marker.clone()).filter(|m| !m.is_empty()),
        }
    }
}

/// Write the console log with its banner header
pub async fn write_log(path: &Path, result_name: &str, lines: &[String]) -> Result<()> {
    let mut content = format!("BENCHMARK: {}\n{}\n", result_name, "=".repeat(RULE_WIDTH));
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

#[async_trait]
impl LoadGenerator for BenchmarkRunner {
    async fn run_trial(
        &self,
        entry: &PlanEntry,
        trial: &TrialSpec,
        result_name: &str,
    ) -> Result<ResultArtifact> {
        let rule = "=".repeat(RULE_WIDTH);
        println!();
        println!("{}", rule);
        println!("BENCHMARK: {}", result_name);
        println!("{}", rule);

        let results = &trial.results;
        if results.save_result {
            tokio::fs::create_dir_all(&results.result_dir).await?;
        }

        let cmd = bench_command(entry, trial, result_name, &self.binaries);
        info!("Running: {}", cmd);
        let output = run_streaming(&cmd, self.log_filter.as_deref()).await?;

        let mut artifact = ResultArtifact::new(result_name, &entry.name);
        artifact.exit_code = output.exit_code;

        if results.save_result {
            let log_path = PathBuf::from(&results.result_dir).join(format!("{}.txt", result_name));
            write_log(&log_path, result_name, &output.lines).await?;
            artifact.log_path = Some(log_path);

            let structured = structured_result_path(entry.engine, &results.result_dir, result_name);
            if tokio::fs::try_exists(&structured).await.unwrap_or(false) {
                artifact.structured_result = Some(structured);
            } else if output.success() {
                warn!("Benchmark finished but wrote no result file at {}", structured.display());
            }
        }
        let succeeded = output.success();
        artifact.console_log = output.lines;

        if !succeeded {
            return Err(Error::trial(format!(
                "{} exited with code {:?}",
                result_name, output.exit_code
            )));
        }

        Ok(artifact)
    }
}
