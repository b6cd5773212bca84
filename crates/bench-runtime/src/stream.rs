//! Live streaming of subprocess output
//!
//! stdout and stderr are read line by line as they are produced and echoed to our
//! own stdout immediately. A copy of every line that does not contain the filter
//! marker is kept for the persisted log.

use crate::engine::CommandLine;
use bench_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What a streamed run left behind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured lines, minus filtered ones
    pub lines: Vec<String>,
}

impl StreamOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Forward `reader` line by line until EOF. Bytes that are not UTF-8 are
/// replaced rather than ending the stream.
fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Stopped reading subprocess output: {}", e);
                    break;
                }
            }
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            let line = String::from_utf8_lossy(&buf).into_owned();
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

/// Run `cmd` to completion, echoing its output live.
///
/// Lines containing `filter` (when given) are echoed but not captured.
pub async fn run_streaming(cmd: &CommandLine, filter: Option<&str>) -> Result<StreamOutput> {
    debug!("Running: {}", cmd);

    let mut child = cmd
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::process(format!("Failed to spawn {}: {}", cmd.program, e)))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        println!("{}", line);
        if filter.map_or(true, |marker| !line.contains(marker)) {
            lines.push(line);
        }
    }

    for reader in readers {
        let _ = reader.await;
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::process(format!("Failed to wait for {}: {}", cmd.program, e)))?;

    Ok(StreamOutput {
        exit_code: status.code(),
        lines,
    })
}
