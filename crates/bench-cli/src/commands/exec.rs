//! Remote entry point: run a shipped task file and print its report

use anyhow::Result;
use bench_runner::{result_line, TaskFile};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn exec(plan: &Path, verbose: bool, cancel: CancellationToken) -> Result<i32> {
    super::default_logging(verbose)?;
    let task = TaskFile::from_file(plan)?;

    let report = task.execute(&cancel).await?;
    println!("{}", result_line(&report)?);

    if report.interrupted {
        warn!("Plan interrupted");
        return Ok(130);
    }
    Ok(if report.is_clean() { 0 } else { 1 })
}
