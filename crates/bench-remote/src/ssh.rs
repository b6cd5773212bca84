//! Thin client over the system `ssh` and `scp` binaries
//!
//! Hosts are ephemeral, so host-key checking is off and known-hosts writes go
//! to `/dev/null`. Password authentication goes through `sshpass -e`, which
//! reads the secret from `SSHPASS` rather than the command line. Uploads use
//! scp; downloads stream `cat` over ssh so remote paths get ordinary shell
//! quoting whichever protocol the local scp speaks.

use async_trait::async_trait;
use bench_core::{ConnectionEndpoint, Credential, Error, HandshakeProbe, Result};
use bench_runtime::{run_streaming, CommandLine, StreamOutput};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Exit status ssh reserves for its own connection and auth failures
const SSH_FAILURE: i32 = 255;

#[derive(Debug, Clone, PartialEq)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    /// Upper bound for one handshake probe, connection included
    pub probe_timeout: Duration,
    pub ssh_program: String,
    pub scp_program: String,
    pub sshpass_program: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(30),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            sshpass_program: "sshpass".to_string(),
        }
    }
}

/// Captured result of a non-streamed remote command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Quote `s` for a POSIX shell unless it is made of harmless characters
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:@+,%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Shell expression for a remote path, expanding a leading `~`
pub fn remote_path(path: &str) -> String {
    if path == "~" {
        return "\"$HOME\"".to_string();
    }
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "\"$HOME\"".to_string(),
        Some(rest) => format!("\"$HOME\"/{}", shell_quote(rest)),
        None => shell_quote(path),
    }
}

/// First executable called `name` in the directories of `search_path`
pub fn find_program(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.is_file() && meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        meta.is_file()
    }
}

/// Runs commands and transfers files over SSH
#[derive(Debug, Clone, Default)]
pub struct SshClient {
    options: SshOptions,
}

impl SshClient {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    /// `program`, wrapped in sshpass when the endpoint uses a password
    fn base(&self, program: &str, endpoint: &ConnectionEndpoint) -> CommandLine {
        match &endpoint.credential {
            Credential::Password(password) => CommandLine::new(&self.options.sshpass_program)
                .args(["-e", program])
                .env("SSHPASS", password),
            _ => CommandLine::new(program),
        }
    }

    fn common_options(&self, endpoint: &ConnectionEndpoint) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        match &endpoint.credential {
            Credential::Password(_) => {}
            Credential::PrivateKey(key) => {
                opts.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
                opts.extend(["-i".to_string(), key.to_string_lossy().into_owned()]);
            }
            Credential::SshConfig => {
                opts.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            }
        }
        opts
    }

    /// Port flag; ssh config aliases keep their own port
    fn port_args(&self, flag: &str, endpoint: &ConnectionEndpoint) -> Vec<String> {
        match endpoint.credential {
            Credential::SshConfig => Vec::new(),
            _ => vec![flag.to_string(), endpoint.port.to_string()],
        }
    }

    pub fn ssh_command(&self, endpoint: &ConnectionEndpoint, remote_cmd: &str) -> CommandLine {
        self.base(&self.options.ssh_program, endpoint)
            .args(self.common_options(endpoint))
            .args(self.port_args("-p", endpoint))
            .arg(endpoint.target())
            .arg(remote_cmd)
            .own_process_group()
    }

    pub fn upload_command(&self, endpoint: &ConnectionEndpoint, local: &Path, remote: &str) -> CommandLine {
        self.base(&self.options.scp_program, endpoint)
            .args(self.common_options(endpoint))
            .args(self.port_args("-P", endpoint))
            .arg(local.to_string_lossy())
            .arg(format!("{}:{}", endpoint.target(), remote))
    }

    /// `cat` of one remote file; the path is quoted for the remote shell
    pub fn download_command(&self, endpoint: &ConnectionEndpoint, remote: &str) -> CommandLine {
        self.ssh_command(endpoint, &format!("cat {}", remote_path(remote)))
    }

    /// Run `remote_cmd` and capture its output.
    ///
    /// Connection and authentication failures are errors; a remote command
    /// that merely exits non-zero is reported in the output.
    pub async fn exec(&self, endpoint: &ConnectionEndpoint, remote_cmd: &str) -> Result<ExecOutput> {
        let cmd = self.ssh_command(endpoint, remote_cmd);
        debug!("ssh {}: {}", endpoint, remote_cmd);

        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ssh(format!("Failed to run {}: {}", cmd.program, e)))?;

        let result = ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.exit_code == Some(SSH_FAILURE) {
            return Err(Error::ssh(format!(
                "connection to {} failed: {}",
                endpoint,
                result.stderr.trim()
            )));
        }
        Ok(result)
    }

    /// Run `remote_cmd`, echoing its output locally as it arrives
    pub async fn exec_streaming(&self, endpoint: &ConnectionEndpoint, remote_cmd: &str) -> Result<StreamOutput> {
        let output = run_streaming(&self.ssh_command(endpoint, remote_cmd), None).await?;
        if output.exit_code == Some(SSH_FAILURE) {
            let detail = output.lines.last().cloned().unwrap_or_default();
            return Err(Error::ssh(format!("connection to {} failed: {}", endpoint, detail)));
        }
        Ok(output)
    }

    /// Write `contents` to `remote` through the session's stdin
    pub async fn write_file(&self, endpoint: &ConnectionEndpoint, remote: &str, contents: &[u8]) -> Result<()> {
        let cmd = self.ssh_command(endpoint, &format!("cat > {}", remote_path(remote)));
        let mut child = cmd
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ssh(format!("Failed to run {}: {}", cmd.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(contents).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::ssh(format!(
                "writing {} on {} failed: {}",
                remote,
                endpoint,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn transfer(&self, cmd: CommandLine, what: &str) -> Result<()> {
        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ssh(format!("Failed to run {}: {}", cmd.program, e)))?;

        if !output.status.success() {
            return Err(Error::ssh(format!(
                "{} failed: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    pub async fn upload(&self, endpoint: &ConnectionEndpoint, local: &Path, remote: &str) -> Result<()> {
        debug!("Uploading {} to {}:{}", local.display(), endpoint, remote);
        self.transfer(
            self.upload_command(endpoint, local, remote),
            &format!("upload of {}", local.display()),
        )
        .await
    }

    /// Copy `remote` into `local` through the session's stdout.
    ///
    /// A partially written `local` is removed when the transfer fails.
    pub async fn download(&self, endpoint: &ConnectionEndpoint, remote: &str, local: &Path) -> Result<()> {
        debug!("Downloading {}:{} to {}", endpoint, remote, local.display());
        let cmd = self.download_command(endpoint, remote);
        let file = tokio::fs::File::create(local).await?.into_std().await;

        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ssh(format!("Failed to run {}: {}", cmd.program, e)))?
            .wait_with_output()
            .await?;

        if !output.status.success() {
            if let Err(e) = tokio::fs::remove_file(local).await {
                debug!("Could not remove partial {}: {}", local.display(), e);
            }
            return Err(Error::ssh(format!(
                "download of {} failed: {}",
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl HandshakeProbe for SshClient {
    async fn handshake(&self, endpoint: &ConnectionEndpoint) -> bool {
        match tokio::time::timeout(self.options.probe_timeout, self.exec(endpoint, "echo ok")).await {
            Ok(Ok(output)) => output.success() && output.stdout.trim() == "ok",
            Ok(Err(e)) => {
                debug!("SSH probe to {} failed: {}", endpoint, e);
                false
            }
            Err(_) => {
                warn!("SSH probe to {} timed out", endpoint);
                false
            }
        }
    }
}
