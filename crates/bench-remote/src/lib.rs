//! # bench-remote
//!
//! Remote execution side of benchmaq, built on the system `ssh` and `scp`
//! clients (with `sshpass` for password authentication).
//!
//! This crate provides:
//! - [`SshClient`]: command execution, streaming, file transfer and the
//!   handshake probe used while waiting for fresh instances
//! - [`RemoteSession`]: materializes an isolated Python environment on the host
//!   and runs one unit of work inside it with live output
//! - [`ResultCollector`]: pulls result files back over a fresh transport

pub mod collector;
pub mod session;
pub mod ssh;

// Re-export main types
pub use collector::ResultCollector;
pub use session::{EnvironmentSpec, RemoteSession, RemoteWork, Upload, DEFAULT_DEPENDENCIES};
pub use ssh::{find_program, remote_path, shell_quote, ExecOutput, SshClient, SshOptions};
