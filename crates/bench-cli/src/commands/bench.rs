//! Local and remote-host benchmark runs

use crate::output::OutputFormat;
use anyhow::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn bench(
    config_path: &Path,
    format: OutputFormat,
    verbose: bool,
    cancel: CancellationToken,
) -> Result<i32> {
    let config = super::load_config(config_path, verbose)?;
    let outcome = bench_runner::bench(&config, cancel).await?;
    super::report(&outcome, format)
}
