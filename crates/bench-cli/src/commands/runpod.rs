//! RunPod commands

use crate::output::{OutputFormat, OutputFormatter};
use anyhow::{bail, Result};
use bench_cloud::{RunPodClient, RunPodCredential};
use bench_core::CloudProvisioner;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Client for the key in `config`, falling back to `RUNPOD_API_KEY`
fn client(config_path: Option<&Path>, verbose: bool) -> Result<RunPodClient> {
    let api_key = match config_path {
        Some(path) => super::load_config(path, verbose)?
            .runpod
            .and_then(|r| r.runpod_api_key),
        None => {
            super::default_logging(verbose)?;
            None
        }
    };
    Ok(RunPodClient::new(RunPodCredential::resolve(api_key.as_deref())?)?)
}

pub async fn bench(
    config_path: &Path,
    format: OutputFormat,
    verbose: bool,
    cancel: CancellationToken,
) -> Result<i32> {
    let config = super::load_config(config_path, verbose)?;
    let outcome = bench_runner::runpod_bench(&config, cancel).await?;
    super::report(&outcome, format)
}

pub async fn list(config_path: Option<&Path>, format: OutputFormat, verbose: bool) -> Result<i32> {
    let pods = client(config_path, verbose)?.list().await?;
    OutputFormatter::new(format).print_list(&pods)?;
    Ok(0)
}

pub async fn find(id: &str, config_path: Option<&Path>, format: OutputFormat, verbose: bool) -> Result<i32> {
    let client = client(config_path, verbose)?;
    let pod = match client.find(id).await? {
        Some(pod) => pod,
        None => match client.find_by_name(id).await? {
            Some(pod) => pod,
            None => bail!("Pod {} not found", id),
        },
    };
    OutputFormatter::new(format).print_item(&pod)?;
    Ok(0)
}

pub async fn delete(
    id_or_name: &str,
    config_path: Option<&Path>,
    format: OutputFormat,
    verbose: bool,
) -> Result<i32> {
    client(config_path, verbose)?.destroy(id_or_name).await?;
    OutputFormatter::new(format).print_success(&format!("Pod {} deleted", id_or_name))?;
    Ok(0)
}
