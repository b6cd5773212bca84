//! Pulling result files back from a host
//!
//! Collection opens its own SSH connections, so it works after the session
//! that produced the files is gone. Nothing here fails the run: missing
//! directories and failed transfers are logged and reported.

use crate::ssh::{remote_path, SshClient};
use async_trait::async_trait;
use bench_core::{ArtifactCollector, CollectionReport, ConnectionEndpoint};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Listing order: a structured format with its logs, the alternate structured
/// format with its logs, then logs alone
const SUFFIX_GROUPS: &[(&str, &[&str])] = &[
    ("json", &["json", "txt"]),
    ("jsonl", &["jsonl", "txt"]),
    ("txt", &["txt"]),
];

/// Local directory mirroring `remote_dir` under `base`
pub fn local_target(base: &Path, remote_dir: &str) -> PathBuf {
    let trimmed = remote_dir.trim_start_matches("./").trim_end_matches('/');
    let relative = trimmed.trim_start_matches("~/");
    if relative.starts_with('/') {
        let name = Path::new(relative)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "results".into());
        base.join(name)
    } else if relative.is_empty() || relative == "~" {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// Downloads `.json`/`.jsonl`/`.txt` results over ssh
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    ssh: SshClient,
}

impl ResultCollector {
    pub fn new(ssh: SshClient) -> Self {
        Self { ssh }
    }

    /// Files in `dir` for the first suffix group whose primary format is present
    async fn list_files(&self, endpoint: &ConnectionEndpoint, dir: &str) -> bench_core::Result<Vec<String>> {
        let dir_expr = remote_path(dir.trim_end_matches('/'));
        for (primary, suffixes) in SUFFIX_GROUPS {
            let globs: Vec<String> = suffixes.iter().map(|s| format!("{}/*.{}", dir_expr, s)).collect();
            let output = self
                .ssh
                .exec(endpoint, &format!("ls -1 {} 2>/dev/null", globs.join(" ")))
                .await?;

            let files: Vec<String> = output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with("ls:"))
                .map(str::to_string)
                .collect();

            if files.iter().any(|f| f.ends_with(&format!(".{}", primary))) {
                return Ok(files);
            }
        }
        Ok(Vec::new())
    }

    async fn collect_dir(&self, endpoint: &ConnectionEndpoint, dir: &str, local_dir: &Path) -> CollectionReport {
        let mut report = CollectionReport::default();

        let check = format!(
            "test -d {} && echo EXISTS || echo NOT_FOUND",
            remote_path(dir.trim_end_matches('/'))
        );
        match self.ssh.exec(endpoint, &check).await {
            Ok(output) if output.stdout.contains("EXISTS") => {}
            Ok(_) => {
                info!("No results found at {} on remote", dir);
                return report;
            }
            Err(e) => {
                warn!("Could not inspect {} on {}: {}", dir, endpoint, e);
                report.errors.push(format!("{}: {}", dir, e));
                return report;
            }
        }

        let files = match self.list_files(endpoint, dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Could not list {} on {}: {}", dir, endpoint, e);
                report.errors.push(format!("{}: {}", dir, e));
                return report;
            }
        };
        if files.is_empty() {
            info!("No result files in {}", dir);
            return report;
        }

        let target = local_target(local_dir, dir);
        if let Err(e) = tokio::fs::create_dir_all(&target).await {
            warn!("Could not create {}: {}", target.display(), e);
            report.errors.push(format!("{}: {}", target.display(), e));
            return report;
        }

        info!("Downloading results from {} to {}/...", dir, target.display());
        for remote_file in files {
            let Some(filename) = Path::new(&remote_file).file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            match self.ssh.download(endpoint, &remote_file, &target.join(&filename)).await {
                Ok(()) => {
                    info!("  Downloaded: {}", filename);
                    report.downloaded.push(filename);
                }
                Err(e) => {
                    warn!("  Failed to download {}: {}", filename, e);
                    report.errors.push(format!("{}: {}", filename, e));
                }
            }
        }

        report
    }
}

#[async_trait]
impl ArtifactCollector for ResultCollector {
    async fn collect(&self, endpoint: &ConnectionEndpoint, remote_dirs: &[String], local_dir: &Path) -> CollectionReport {
        let mut report = CollectionReport::default();
        for dir in remote_dirs {
            report.merge(self.collect_dir(endpoint, dir, local_dir).await);
        }
        info!(
            "Collected {} files ({} errors)",
            report.downloaded.len(),
            report.errors.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::SshOptions;
    use bench_core::Credential;

    fn executable(path: &Path, body: &str) -> String {
        std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path.to_string_lossy().into_owned()
    }

    /// ssh runs commands locally from `home`, failing any `cat` of a file whose
    /// name contains "broken"
    fn local_collector(dir: &Path, home: &Path) -> ResultCollector {
        let ssh = executable(
            &dir.join("fake-ssh"),
            &format!(
                "for last; do :; done\n\
                 case \"$last\" in cat*broken*) echo 'read error' >&2; exit 1 ;; esac\n\
                 cd {} && sh -c \"$last\"",
                home.display()
            ),
        );
        ResultCollector::new(SshClient::new(SshOptions {
            ssh_program: ssh,
            ..SshOptions::default()
        }))
    }

    fn endpoint() -> ConnectionEndpoint {
        ConnectionEndpoint::new("gpu-box", 22, Credential::SshConfig)
    }

    fn touch(dir: &Path, names: &[&str]) {
        std::fs::create_dir_all(dir).unwrap();
        for name in names {
            std::fs::write(dir.join(name), name).unwrap();
        }
    }

    #[test]
    fn test_local_target() {
        let base = Path::new("/out");
        assert_eq!(local_target(base, "./benchmark_results"), Path::new("/out/benchmark_results"));
        assert_eq!(local_target(base, "results/run1/"), Path::new("/out/results/run1"));
        assert_eq!(local_target(base, "/workspace/results"), Path::new("/out/results"));
        assert_eq!(local_target(base, "~/results"), Path::new("/out/results"));
    }

    #[tokio::test]
    async fn test_downloads_json_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        touch(&home.join("benchmark_results"), &["a_p10_abc123.json", "a_p10_abc123.txt"]);
        let local = dir.path().join("local");

        let report = local_collector(dir.path(), &home)
            .collect(&endpoint(), &["./benchmark_results".to_string()], &local)
            .await;

        assert!(report.errors.is_empty());
        let mut downloaded = report.downloaded.clone();
        downloaded.sort();
        assert_eq!(downloaded, ["a_p10_abc123.json", "a_p10_abc123.txt"]);
        assert!(local.join("benchmark_results/a_p10_abc123.json").exists());
    }

    #[tokio::test]
    async fn test_result_dir_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        touch(&home.join("my results"), &["run 1.json", "run 1.txt"]);
        let local = dir.path().join("local");

        let report = local_collector(dir.path(), &home)
            .collect(&endpoint(), &["my results".to_string()], &local)
            .await;

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.downloaded.len(), 2);
        assert_eq!(
            std::fs::read_to_string(local.join("my results/run 1.json")).unwrap(),
            "run 1.json"
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_jsonl_then_txt() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        touch(&home.join("sglang"), &["s.jsonl", "s.txt"]);
        touch(&home.join("logs"), &["only.txt"]);
        let local = dir.path().join("local");
        let collector = local_collector(dir.path(), &home);

        let report = collector.collect(&endpoint(), &["sglang".to_string()], &local).await;
        let mut downloaded = report.downloaded.clone();
        downloaded.sort();
        assert_eq!(downloaded, ["s.jsonl", "s.txt"]);

        let report = collector.collect(&endpoint(), &["logs".to_string()], &local).await;
        assert_eq!(report.downloaded, ["only.txt"]);
    }

    #[tokio::test]
    async fn test_missing_dir_and_failed_file_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        touch(&home.join("results"), &["good.json", "broken.json"]);
        let local = dir.path().join("local");

        let report = local_collector(dir.path(), &home)
            .collect(&endpoint(), &["missing".to_string(), "results".to_string()], &local)
            .await;

        assert_eq!(report.downloaded, ["good.json"]);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("broken.json"));
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = executable(&dir.path().join("down-ssh"), "echo 'No route to host' >&2; exit 255");
        let collector = ResultCollector::new(SshClient::new(SshOptions {
            ssh_program: ssh,
            ..SshOptions::default()
        }));

        let report = collector
            .collect(&endpoint(), &["results".to_string()], dir.path())
            .await;
        assert!(report.downloaded.is_empty());
        assert_eq!(report.errors.len(), 1);
    }
}
