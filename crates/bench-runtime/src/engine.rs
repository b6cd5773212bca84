//! Command lines for the serving and benchmarking tools of each engine

use crate::config::EngineBinaries;
use bench_core::{Engine, PlanEntry, TrialSpec};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// A program invocation, kept as data so it can be logged and tested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Start in a new process group so a terminal Ctrl-C does not reach it
    pub own_process_group: bool,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            own_process_group: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn own_process_group(mut self) -> Self {
        self.own_process_group = true;
        self
    }

    /// Build a tokio command; stdio is left to the caller
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        if self.own_process_group {
            command.process_group(0);
        }
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Server invocation for a plan entry
pub fn serve_command(entry: &PlanEntry, bins: &EngineBinaries) -> CommandLine {
    let serve = &entry.serve;
    let base = match entry.engine {
        Engine::Vllm => CommandLine::new(&bins.vllm)
            .args(["serve", serve.model.as_str()])
            .arg("--port")
            .arg(serve.port.to_string()),
        Engine::Sglang => CommandLine::new(&bins.python)
            .args(["-m", "sglang.launch_server", "--model-path", serve.model.as_str()])
            .args(["--host", "0.0.0.0", "--port"])
            .arg(serve.port.to_string()),
    };
    base.args(serve.args.to_cli_flags())
}

/// Where a trial's structured result lands when persisted
pub fn structured_result_path(engine: Engine, result_dir: &str, result_name: &str) -> PathBuf {
    let file = match engine {
        Engine::Vllm => format!("{}.json", result_name),
        Engine::Sglang => format!("{}.jsonl", result_name),
    };
    Path::new(result_dir).join(file)
}

/// Load-generator invocation for one trial
pub fn bench_command(
    entry: &PlanEntry,
    trial: &TrialSpec,
    result_name: &str,
    bins: &EngineBinaries,
) -> CommandLine {
    let serve = &entry.serve;
    let results = &trial.results;

    match entry.engine {
        Engine::Vllm => {
            let mut cmd = CommandLine::new(&bins.vllm)
                .args(["bench", "serve", "--model", serve.model.as_str()])
                .arg("--base-url")
                .arg(serve.base_url())
                .args(trial.args.to_cli_flags());
            if results.save_result {
                cmd = cmd
                    .args(["--save-result", "--result-dir", results.result_dir.as_str()])
                    .arg("--result-filename")
                    .arg(format!("{}.json", result_name));
            }
            cmd
        }
        Engine::Sglang => {
            let mut args = trial.args.clone();
            let mut cmd = CommandLine::new(&bins.python)
                .args(["-m", "sglang.bench_serving", "--port"])
                .arg(serve.port.to_string())
                .args(["--model", serve.model.as_str()]);
            if !args.contains_key("base_url") {
                let host = args
                    .remove("host")
                    .map(|h| h.to_string())
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| "127.0.0.1".to_string());
                cmd = cmd.arg("--host").arg(host);
            }
            cmd = cmd.args(args.to_cli_flags());
            if results.save_result {
                let output = structured_result_path(Engine::Sglang, &results.result_dir, result_name);
                cmd = cmd
                    .arg("--output-file")
                    .arg(output.to_string_lossy().into_owned())
                    .arg("--output-details");
            }
            cmd
        }
    }
}
