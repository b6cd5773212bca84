//! Command implementations for the benchmaq CLI

pub mod bench;
pub mod exec;
pub mod runpod;
pub mod sky;
pub mod validate;

use crate::output::{OutputFormat, OutputFormatter};
use anyhow::{Context, Result};
use bench_core::{LoggingConfig, RunOutcome};
use bench_runner::{init_logging, RunConfig};
use std::path::Path;

/// Read a configuration document and set up logging from its `logging:` section
pub fn load_config(path: &Path, verbose: bool) -> Result<RunConfig> {
    let config = RunConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    init_logging(&config.logging, verbose)?;
    Ok(config)
}

/// Logging for commands that run without a configuration document
pub fn default_logging(verbose: bool) -> Result<()> {
    init_logging(&LoggingConfig::default(), verbose)?;
    Ok(())
}

/// Print the run report and hand back the process exit code
pub fn report(outcome: &RunOutcome, format: OutputFormat) -> Result<i32> {
    OutputFormatter::new(format).print_item(outcome)?;
    Ok(outcome.exit_code())
}
