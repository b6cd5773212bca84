//! benchmaq - Benchmark LLM serving engines locally, over SSH, or on rented GPUs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod commands;
mod output;

use output::OutputFormat;

/// Benchmark LLM serving engines locally, over SSH, or on rented GPUs
#[derive(Debug, Parser)]
#[command(name = "benchmaq")]
#[command(about = "Benchmark LLM serving engines locally, over SSH, or on rented GPUs")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a benchmark plan on this host, or on `remote:` when configured
    #[command(name = "bench")]
    Bench {
        /// Configuration file
        config: PathBuf,
    },

    /// Benchmark on RunPod pods
    #[command(name = "runpod")]
    Runpod {
        #[command(subcommand)]
        action: RunpodCommands,
    },

    /// Benchmark on SkyPilot clusters
    #[command(name = "sky")]
    Sky {
        #[command(subcommand)]
        action: SkyCommands,
    },

    /// Check a configuration file and show the trials it expands to
    #[command(name = "validate")]
    Validate {
        /// Configuration file
        config: PathBuf,
    },

    /// Run a serialized plan on this host
    #[command(name = "exec", hide = true)]
    Exec {
        /// Task file written by a controller
        #[arg(long, value_name = "FILE")]
        plan: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
pub enum RunpodCommands {
    /// Deploy a pod, benchmark on it, collect results, and delete it
    Bench {
        /// Configuration file
        config: PathBuf,
    },

    /// List pods
    List {
        /// Configuration file holding the API key
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Show one pod
    Find {
        /// Pod id or name
        id: String,

        /// Configuration file holding the API key
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Delete a pod
    Delete {
        /// Pod id or name
        id_or_name: String,

        /// Configuration file holding the API key
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum SkyCommands {
    /// Launch a cluster, benchmark on it, collect results, and tear it down
    Bench {
        /// Configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Show clusters
    Status,

    /// Tear a cluster down
    Down {
        /// Cluster name
        cluster: String,
    },
}

/// Cancel `token` on the first Ctrl-C. A second one exits immediately,
/// leaving any leased instance behind.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("Interrupted, cleaning up (press Ctrl-C again to exit now)");
        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Exiting without cleanup; check your provider for running instances");
            std::process::exit(130);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let format = cli.output;
    let verbose = cli.verbose;

    let code = match cli.command {
        Commands::Bench { config } => commands::bench::bench(&config, format, verbose, cancel).await?,
        Commands::Runpod { action } => match action {
            RunpodCommands::Bench { config } => {
                commands::runpod::bench(&config, format, verbose, cancel).await?
            }
            RunpodCommands::List { config } => {
                commands::runpod::list(config.as_deref(), format, verbose).await?
            }
            RunpodCommands::Find { id, config } => {
                commands::runpod::find(&id, config.as_deref(), format, verbose).await?
            }
            RunpodCommands::Delete { id_or_name, config } => {
                commands::runpod::delete(&id_or_name, config.as_deref(), format, verbose).await?
            }
        },
        Commands::Sky { action } => match action {
            SkyCommands::Bench { config } => commands::sky::bench(&config, format, verbose, cancel).await?,
            SkyCommands::Status => commands::sky::status(format, verbose).await?,
            SkyCommands::Down { cluster } => commands::sky::down(&cluster, format, verbose).await?,
        },
        Commands::Validate { config } => commands::validate::validate(&config, format, verbose)?,
        Commands::Exec { plan } => commands::exec::exec(&plan, verbose, cancel).await?,
    };

    std::process::exit(code)
}
