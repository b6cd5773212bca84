//! SkyPilot commands

use crate::output::{OutputFormat, OutputFormatter};
use anyhow::Result;
use bench_cloud::SkyPilotClient;
use bench_core::CloudProvisioner;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn bench(
    config_path: &Path,
    format: OutputFormat,
    verbose: bool,
    cancel: CancellationToken,
) -> Result<i32> {
    let config = super::load_config(config_path, verbose)?;
    let outcome = bench_runner::sky_bench(&config, cancel).await?;
    super::report(&outcome, format)
}

pub async fn status(format: OutputFormat, verbose: bool) -> Result<i32> {
    super::default_logging(verbose)?;
    let clusters = SkyPilotClient::new().list().await?;
    OutputFormatter::new(format).print_list(&clusters)?;
    Ok(0)
}

pub async fn down(cluster: &str, format: OutputFormat, verbose: bool) -> Result<i32> {
    super::default_logging(verbose)?;
    SkyPilotClient::new().destroy(cluster).await?;
    OutputFormatter::new(format).print_success(&format!("Cluster {} is down", cluster))?;
    Ok(0)
}
