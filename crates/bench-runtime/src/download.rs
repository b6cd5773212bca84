//! Model weight download through the Hugging Face CLI

use crate::config::EngineBinaries;
use crate::engine::CommandLine;
use crate::stream::run_streaming;
use async_trait::async_trait;
use bench_core::{Error, ModelDownload, ModelFetcher, Result};
use tracing::info;

/// Fetches weights with `huggingface-cli download`
pub struct HfDownloader {
    program: String,
}

impl HfDownloader {
    pub fn new(bins: &EngineBinaries) -> Self {
        Self {
            program: bins.downloader.clone(),
        }
    }

    /// The download invocation; the token comes from the download step or `HF_TOKEN`
    pub fn command(&self, download: &ModelDownload) -> CommandLine {
        let mut cmd = CommandLine::new(&self.program)
            .args(["download", download.repo_id.as_str()])
            .args(["--local-dir", download.local_dir.as_str()])
            .env("HF_HUB_ENABLE_HF_TRANSFER", "1");

        let token = download
            .hf_token
            .clone()
            .or_else(|| std::env::var("HF_TOKEN").ok())
            .filter(|t| !t.is_empty());
        if let Some(token) = token {
            cmd = cmd.env("HF_TOKEN", token);
        }
        cmd
    }
}

impl Default for HfDownloader {
    fn default() -> Self {
        Self::new(&EngineBinaries::default())
    }
}

#[async_trait]
impl ModelFetcher for HfDownloader {
    async fn fetch(&self, download: &ModelDownload) -> Result<()> {
        info!("Downloading {} to {}", download.repo_id, download.local_dir);
        tokio::fs::create_dir_all(&download.local_dir).await?;

        let output = run_streaming(&self.command(download), None).await?;
        if !output.success() {
            return Err(Error::download(format!(
                "{} exited with code {:?}",
                self.program, output.exit_code
            )));
        }

        info!("Model download completed: {}", download.repo_id);
        Ok(())
    }
}
