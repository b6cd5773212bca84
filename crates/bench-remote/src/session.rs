//! One unit of work on a remote host, inside an isolated Python environment
//!
//! The session materializes a `uv` virtual environment, uploads the work's
//! files into a scratch directory, runs its command with the environment's
//! `bin/` first on `PATH`, and streams every output line back as it arrives.
//! Nothing here retries: a host that cannot be reached is an error for the
//! caller, who should have waited for connectivity first.
//!
//! The local ssh runs in its own process group, so an operator's Ctrl-C reaches
//! only the controller. Cancellation is forwarded as SIGINT to the processes
//! running from the scratch directory, and the stream is read until the work
//! exits on its own or the grace period runs out.

use crate::ssh::{remote_path, shell_quote, SshClient};
use bench_core::{ConnectionEndpoint, Error, Result};
use bench_runtime::StreamOutput;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_DEPENDENCIES: &[&str] = &["pyyaml", "requests", "vllm==0.11.0", "huggingface_hub"];

const UV_INSTALLER: &str = "https://astral.sh/uv/install.sh";

/// Interpreter and packages the work needs on the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSpec {
    /// Virtual environment location; `~` is the remote home
    pub path: String,
    pub python_version: String,
    pub dependencies: Vec<String>,
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            path: "~/.benchmark-venv".to_string(),
            python_version: "3.11".to_string(),
            dependencies: DEFAULT_DEPENDENCIES.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl EnvironmentSpec {
    /// Shell expression for the environment's `bin/` directory
    pub fn bin_dir(&self) -> String {
        format!("{}/bin", remote_path(&self.path))
    }

    /// Idempotent script: install uv if missing, create the venv if absent,
    /// then install the dependencies into it
    pub fn setup_script(&self) -> String {
        let venv = remote_path(&self.path);
        let mut script = vec![
            "set -e".to_string(),
            "export PATH=\"$HOME/.local/bin:$HOME/.cargo/bin:$PATH\"".to_string(),
            "if ! command -v uv >/dev/null 2>&1; then".to_string(),
            "  echo 'Installing uv...'".to_string(),
            format!("  curl -LsSf {} | sh", UV_INSTALLER),
            "fi".to_string(),
            format!("if [ ! -x {}/bin/python ]; then", venv),
            format!("  uv venv --python {} {}", shell_quote(&self.python_version), venv),
            "fi".to_string(),
        ];

        if !self.dependencies.is_empty() {
            let deps: Vec<String> = self.dependencies.iter().map(|d| shell_quote(d)).collect();
            script.push(format!(
                "uv pip install --python {}/bin/python {}",
                venv,
                deps.join(" ")
            ));
        }

        script.join("\n")
    }
}

/// A file the work needs next to it on the host
#[derive(Debug, Clone, PartialEq)]
pub enum Upload {
    /// Generated content, written through the SSH session
    Bytes { name: String, contents: Vec<u8> },
    /// Local file copied with scp
    File {
        name: String,
        path: PathBuf,
        executable: bool,
    },
}

impl Upload {
    pub fn name(&self) -> &str {
        match self {
            Upload::Bytes { name, .. } | Upload::File { name, .. } => name,
        }
    }
}

/// A unit of work that can be shipped to a host and run there
pub trait RemoteWork: Send + Sync {
    type Output: Send;

    /// Files to place in the scratch directory before the command runs
    fn uploads(&self) -> Result<Vec<Upload>>;

    /// Command to run from the remote home directory; `work_dir` holds the uploads.
    ///
    /// It must be a single simple command: the session shell `exec`s it so the
    /// interrupt lands on the work itself.
    fn command(&self, work_dir: &str) -> String;

    /// Turn the streamed output into the work's result
    fn finish(&self, output: StreamOutput) -> Result<Self::Output>;
}

/// Runs remote work over SSH
#[derive(Debug, Clone)]
pub struct RemoteSession {
    ssh: SshClient,
    /// How long interrupted work may take to wind down and report
    interrupt_grace: Duration,
}

impl Default for RemoteSession {
    fn default() -> Self {
        Self::new(SshClient::default())
    }
}

impl RemoteSession {
    pub fn new(ssh: SshClient) -> Self {
        Self {
            ssh,
            interrupt_grace: Duration::from_secs(120),
        }
    }

    pub fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    pub fn ssh(&self) -> &SshClient {
        &self.ssh
    }

    /// Prepare `env` on the host behind `endpoint` and run `work` inside it once.
    ///
    /// The scratch directory is removed afterwards, interrupted or not.
    pub async fn run<W>(
        &self,
        endpoint: &ConnectionEndpoint,
        env: &EnvironmentSpec,
        work: &W,
        cancel: &CancellationToken,
    ) -> Result<W::Output>
    where
        W: RemoteWork,
    {
        info!("Connecting to remote server: {}", endpoint);
        let work_dir = format!("/tmp/benchmaq-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        let created = self
            .ssh
            .exec(endpoint, &format!("mkdir -p {}", shell_quote(&work_dir)))
            .await?;
        if !created.success() {
            return Err(Error::ssh(format!(
                "could not create {} on {}: {}",
                work_dir,
                endpoint,
                created.stderr.trim()
            )));
        }

        let result = self.run_in(endpoint, env, work, &work_dir, cancel).await;

        match self.ssh.exec(endpoint, &format!("rm -rf {}", shell_quote(&work_dir))).await {
            Ok(output) if output.success() => debug!("Removed {} on {}", work_dir, endpoint),
            Ok(output) => warn!("Could not remove {}: {}", work_dir, output.stderr.trim()),
            Err(e) => warn!("Could not remove {}: {}", work_dir, e),
        }

        result
    }

    async fn run_in<W>(
        &self,
        endpoint: &ConnectionEndpoint,
        env: &EnvironmentSpec,
        work: &W,
        work_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<W::Output>
    where
        W: RemoteWork,
    {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::interrupted(format!("interrupted during environment setup on {}", endpoint)));
            }
            prepared = self.prepare_environment(endpoint, env) => prepared?,
        }

        for upload in work.uploads()? {
            let target = format!("{}/{}", work_dir, upload.name());
            match &upload {
                Upload::Bytes { contents, .. } => {
                    self.ssh.write_file(endpoint, &target, contents).await?;
                }
                Upload::File { path, executable, .. } => {
                    self.ssh.upload(endpoint, path, &target).await?;
                    if *executable {
                        let chmod = self
                            .ssh
                            .exec(endpoint, &format!("chmod +x {}", shell_quote(&target)))
                            .await?;
                        if !chmod.success() {
                            return Err(Error::ssh(format!("chmod of {} failed: {}", target, chmod.stderr.trim())));
                        }
                    }
                }
            }
            debug!("Uploaded {}", target);
        }
        if cancel.is_cancelled() {
            return Err(Error::interrupted(format!("interrupted before work started on {}", endpoint)));
        }

        let script = format!(
            "export PATH={}:\"$PATH\"\nexec {}",
            env.bin_dir(),
            work.command(work_dir)
        );
        let remote_cmd = format!("sh -c {}", shell_quote(&script));
        let streaming = self.ssh.exec_streaming(endpoint, &remote_cmd);
        tokio::pin!(streaming);

        let finished = tokio::select! {
            output = &mut streaming => Some(output),
            _ = cancel.cancelled() => None,
        };
        let output = match finished {
            Some(output) => output?,
            None => {
                self.interrupt_remote(endpoint, work_dir).await;
                match tokio::time::timeout(self.interrupt_grace, &mut streaming).await {
                    Ok(output) => output?,
                    Err(_) => {
                        return Err(Error::interrupted(format!(
                            "work on {} did not stop within {:?} of the interrupt",
                            endpoint, self.interrupt_grace
                        )))
                    }
                }
            }
        };

        work.finish(output)
    }

    /// SIGINT every process whose command line mentions `work_dir`
    async fn interrupt_remote(&self, endpoint: &ConnectionEndpoint, work_dir: &str) {
        warn!("Interrupting remote work on {}", endpoint);
        // The bracket keeps the pattern from matching the shell that runs pkill
        let (first, rest) = work_dir.split_at(1);
        let pattern = format!("[{}]{}", first, rest);
        match self
            .ssh
            .exec(endpoint, &format!("pkill -INT -f {}", shell_quote(&pattern)))
            .await
        {
            Ok(output) if output.success() => debug!("Sent SIGINT to work in {}", work_dir),
            Ok(_) => warn!("No remote process found for {}", work_dir),
            Err(e) => warn!("Could not interrupt remote work on {}: {}", endpoint, e),
        }
    }

    async fn prepare_environment(&self, endpoint: &ConnectionEndpoint, env: &EnvironmentSpec) -> Result<()> {
        info!("UV environment: {} (Python {})", env.path, env.python_version);
        info!("Dependencies: {:?}", env.dependencies);

        let script = env.setup_script();
        let output = self
            .ssh
            .exec_streaming(endpoint, &format!("sh -c {}", shell_quote(&script)))
            .await?;
        if !output.success() {
            return Err(Error::process(format!(
                "environment setup on {} exited with code {:?}",
                endpoint, output.exit_code
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::SshOptions;
    use bench_core::Credential;
    use std::path::Path;

    /// Work that reads back an uploaded file and reports a marker line
    struct EchoWork;

    impl RemoteWork for EchoWork {
        type Output = String;

        fn uploads(&self) -> Result<Vec<Upload>> {
            Ok(vec![Upload::Bytes {
                name: "input.txt".into(),
                contents: b"payload-42".to_vec(),
            }])
        }

        fn command(&self, work_dir: &str) -> String {
            format!("echo \"RESULT $(cat {}/input.txt)\"", work_dir)
        }

        fn finish(&self, output: StreamOutput) -> Result<String> {
            output
                .lines
                .iter()
                .find_map(|l| l.strip_prefix("RESULT ").map(str::to_string))
                .ok_or_else(|| Error::process("no result line"))
        }
    }

    /// Work that runs until interrupted, then reports how it ended. With
    /// `ignore_interrupt` it keeps going for a few seconds regardless.
    struct LoopWork {
        pid_file: PathBuf,
        ignore_interrupt: bool,
    }

    impl RemoteWork for LoopWork {
        type Output = String;

        fn uploads(&self) -> Result<Vec<Upload>> {
            let pid = self.pid_file.display();
            let script = if self.ignore_interrupt {
                format!("trap '' INT\necho $$ > {pid}.tmp && mv {pid}.tmp {pid}\nfor i in 1 2 3 4 5; do sleep 1; done\n")
            } else {
                format!(
                    "trap 'echo \"RESULT stopped\"; exit 130' INT\necho $$ > {pid}.tmp && mv {pid}.tmp {pid}\nwhile :; do sleep 0.1; done\n"
                )
            };
            Ok(vec![Upload::Bytes {
                name: "loop.sh".into(),
                contents: script.into_bytes(),
            }])
        }

        fn command(&self, work_dir: &str) -> String {
            format!("sh {}/loop.sh", work_dir)
        }

        fn finish(&self, output: StreamOutput) -> Result<String> {
            EchoWork.finish(output)
        }
    }

    /// Cancel `token` once the work has written its pid
    fn cancel_when_started(pid_file: PathBuf, token: CancellationToken) {
        tokio::spawn(async move {
            while !pid_file.exists() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            token.cancel();
        });
    }

    /// An `ssh` that runs the remote command locally, but fakes the uv setup.
    /// `pkill` is answered by signalling the pid in `work.pid`.
    fn local_ssh(dir: &Path, setup: &str) -> SshClient {
        let log = dir.join("commands.log");
        let pid = dir.join("work.pid");
        let path = dir.join("fake-ssh");
        std::fs::write(
            &path,
            format!(
                "#!/bin/sh\nfor last; do :; done\necho \"$last\" >> {log}\ncase \"$last\" in\n  *'uv venv'*) {setup} ;;\n  pkill*) kill -INT \"$(cat {pid})\" ;;\n  *) sh -c \"$last\" ;;\nesac\n",
                log = log.display(),
                pid = pid.display(),
                setup = setup
            ),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        SshClient::new(SshOptions {
            ssh_program: path.to_string_lossy().into_owned(),
            ..SshOptions::default()
        })
    }

    fn endpoint() -> ConnectionEndpoint {
        ConnectionEndpoint::new("gpu-box", 2222, Credential::SshConfig)
    }

    #[test]
    fn test_setup_script() {
        let script = EnvironmentSpec::default().setup_script();
        assert!(script.starts_with("set -e\n"));
        assert!(script.contains("command -v uv"));
        assert!(script.contains("if [ ! -x \"$HOME\"/.benchmark-venv/bin/python ]; then"));
        assert!(script.contains("uv venv --python 3.11 \"$HOME\"/.benchmark-venv"));
        assert!(script.ends_with(
            "uv pip install --python \"$HOME\"/.benchmark-venv/bin/python pyyaml requests vllm==0.11.0 huggingface_hub"
        ));
    }

    #[test]
    fn test_setup_script_without_dependencies() {
        let env = EnvironmentSpec {
            dependencies: vec![],
            ..EnvironmentSpec::default()
        };
        assert!(!env.setup_script().contains("uv pip install"));
    }

    #[tokio::test]
    async fn test_run_uploads_and_returns_work_result() {
        let dir = tempfile::tempdir().unwrap();
        let session = RemoteSession::new(local_ssh(dir.path(), "echo 'environment ready'"));

        let result = session
            .run(&endpoint(), &EnvironmentSpec::default(), &EchoWork, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "payload-42");

        let commands = std::fs::read_to_string(dir.path().join("commands.log")).unwrap();
        let order: Vec<&str> = commands
            .lines()
            .filter_map(|l| {
                ["mkdir -p", "uv venv", "cat >", "RESULT", "rm -rf"]
                    .into_iter()
                    .find(|marker| l.contains(marker))
            })
            .collect();
        assert_eq!(order, ["mkdir -p", "uv venv", "cat >", "RESULT", "rm -rf"]);
    }

    #[tokio::test]
    async fn test_failed_setup_is_fatal_and_skips_work() {
        let dir = tempfile::tempdir().unwrap();
        let session = RemoteSession::new(local_ssh(dir.path(), "echo 'no python 3.11'; exit 1"));

        let err = session
            .run(&endpoint(), &EnvironmentSpec::default(), &EchoWork, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Process(_)));

        let commands = std::fs::read_to_string(dir.path().join("commands.log")).unwrap();
        assert!(!commands.contains("RESULT"));
        assert!(commands.contains("rm -rf"));
    }

    #[tokio::test]
    async fn test_interrupt_is_forwarded_and_scratch_removed() {
        let dir = tempfile::tempdir().unwrap();
        let session = RemoteSession::new(local_ssh(dir.path(), "echo 'environment ready'"))
            .with_interrupt_grace(Duration::from_secs(10));
        let work = LoopWork {
            pid_file: dir.path().join("work.pid"),
            ignore_interrupt: false,
        };
        let cancel = CancellationToken::new();
        cancel_when_started(work.pid_file.clone(), cancel.clone());

        let result = tokio::time::timeout(
            Duration::from_secs(20),
            session.run(&endpoint(), &EnvironmentSpec::default(), &work, &cancel),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(result, "stopped");

        let commands = std::fs::read_to_string(dir.path().join("commands.log")).unwrap();
        let pkill = commands.find("pkill -INT -f '[/]tmp/benchmaq-").unwrap();
        let cleanup = commands.find("rm -rf").unwrap();
        assert!(pkill < cleanup);
    }

    #[tokio::test]
    async fn test_work_ignoring_interrupt_is_abandoned_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let session = RemoteSession::new(local_ssh(dir.path(), "echo 'environment ready'"))
            .with_interrupt_grace(Duration::from_millis(300));
        let work = LoopWork {
            pid_file: dir.path().join("work.pid"),
            ignore_interrupt: true,
        };
        let cancel = CancellationToken::new();
        cancel_when_started(work.pid_file.clone(), cancel.clone());

        let err = session
            .run(&endpoint(), &EnvironmentSpec::default(), &work, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_interrupted());

        let commands = std::fs::read_to_string(dir.path().join("commands.log")).unwrap();
        assert!(commands.contains("rm -rf"));
    }

    #[tokio::test]
    async fn test_cancelled_before_setup_skips_work() {
        let dir = tempfile::tempdir().unwrap();
        let session = RemoteSession::new(local_ssh(dir.path(), "sleep 5"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session
            .run(&endpoint(), &EnvironmentSpec::default(), &EchoWork, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_interrupted());

        let commands = std::fs::read_to_string(dir.path().join("commands.log")).unwrap();
        assert!(!commands.contains("RESULT"));
        assert!(commands.contains("rm -rf"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-ssh");
        std::fs::write(&path, "#!/bin/sh\necho x >> \"$(dirname \"$0\")/calls\"\necho 'Connection timed out' >&2\nexit 255\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let session = RemoteSession::new(SshClient::new(SshOptions {
            ssh_program: path.to_string_lossy().into_owned(),
            ..SshOptions::default()
        }));

        let err = session
            .run(&endpoint(), &EnvironmentSpec::default(), &EchoWork, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ssh(_)));
        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }
}
