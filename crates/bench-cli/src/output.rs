//! Output formatting for the benchmaq CLI

use anyhow::Result;
use bench_core::{ComputeInstance, RunOutcome, RunStatus};
use clap::ValueEnum;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Tables and key/value listings
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Something the CLI can show as a table row or a detailed listing
pub trait Formattable {
    fn table_headers() -> Vec<String>;
    fn table_row(&self) -> Vec<String>;

    /// Key-value pairs for the detailed view
    fn key_value_pairs(&self) -> Vec<(String, String)>;
}

/// Output formatter
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Detailed view of one item
    pub fn print_item<T>(&self, item: &T) -> Result<()>
    where
        T: Serialize + Formattable,
    {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(item)?),
            OutputFormat::Table => {
                for (key, value) in item.key_value_pairs() {
                    println!("{}: {}", key.bold().cyan(), value);
                }
            }
        }
        Ok(())
    }

    /// One row per item
    pub fn print_list<T>(&self, items: &[T]) -> Result<()>
    where
        T: Serialize + Formattable,
    {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(items)?),
            OutputFormat::Table if items.is_empty() => println!("{}", "No items found".dimmed()),
            OutputFormat::Table => println!("{}", render_table(items)),
        }
        Ok(())
    }

    /// Confirmation line; structured formats get `{status, message}`
    pub fn print_success(&self, message: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Confirmation<'a> {
            status: &'static str,
            message: &'a str,
        }

        let confirmation = Confirmation {
            status: "success",
            message,
        };
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&confirmation)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&confirmation)?),
            OutputFormat::Table => println!("{} {}", "✓".green().bold(), message.green()),
        }
        Ok(())
    }
}

fn render_table<T: Formattable>(items: &[T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = T::table_headers()
        .iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for item in items {
        table.add_row(item.table_row());
    }
    table
}

/// Compact elapsed time: `45s`, `3m 5s`, `2h 10m`
pub fn format_duration(seconds: u64) -> String {
    let (hours, minutes, secs) = (seconds / 3600, seconds % 3600 / 60, seconds % 60);
    match (hours, minutes) {
        (0, 0) => format!("{}s", secs),
        (0, _) => format!("{}m {}s", minutes, secs),
        _ => format!("{}h {}m", hours, minutes),
    }
}

pub fn colorize_status(status: &str) -> ColoredString {
    match status.to_ascii_lowercase().as_str() {
        "success" | "running" | "up" => status.green(),
        "error" | "exited" | "terminated" => status.red(),
        "interrupted" | "created" | "init" => status.yellow(),
        "unknown" => status.dimmed(),
        _ => status.normal(),
    }
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join("\n")
    }
}

impl Formattable for RunOutcome {
    fn table_headers() -> Vec<String> {
        vec![
            "Status".to_string(),
            "Results".to_string(),
            "Downloaded".to_string(),
            "Failures".to_string(),
        ]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.status.to_string(),
            self.results.len().to_string(),
            self.downloaded.len().to_string(),
            self.failures.len().to_string(),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        let elapsed = (self.finished_at - self.started_at).num_seconds().max(0) as u64;
        let status = match self.status {
            RunStatus::Success if !self.failures.is_empty() => "success (with failures)".yellow().to_string(),
            status => colorize_status(&status.to_string()).to_string(),
        };

        let mut pairs = vec![
            ("Status".to_string(), status),
            ("Duration".to_string(), format_duration(elapsed)),
            ("Results".to_string(), list_or_dash(&self.results)),
            ("Downloaded".to_string(), list_or_dash(&self.downloaded)),
            ("Failures".to_string(), list_or_dash(&self.failures)),
        ];
        if let Some(instance) = &self.instance {
            pairs.push(("Instance".to_string(), instance.clone()));
        }
        if let Some(error) = &self.error {
            pairs.push(("Error".to_string(), error.red().to_string()));
        }
        pairs
    }
}

impl Formattable for ComputeInstance {
    fn table_headers() -> Vec<String> {
        vec![
            "ID".to_string(),
            "Name".to_string(),
            "Status".to_string(),
            "GPU".to_string(),
            "$/hr".to_string(),
            "SSH".to_string(),
        ]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.status.to_string(),
            self.gpu_type.clone().unwrap_or_else(|| "-".to_string()),
            self.cost_per_hr
                .map(|c| format!("{:.3}", c))
                .unwrap_or_else(|| "-".to_string()),
            self.ssh
                .as_ref()
                .map(|s| format!("{}:{}", s.ip, s.port))
                .unwrap_or_else(|| "-".to_string()),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        Self::table_headers()
            .into_iter()
            .zip(self.table_row())
            .map(|(key, value)| {
                let value = if key == "Status" {
                    colorize_status(&value).to_string()
                } else {
                    value
                };
                (key, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::InstanceStatus;

    fn outcome(failures: Vec<String>) -> RunOutcome {
        RunOutcome {
            status: RunStatus::Success,
            results: vec!["llama_in1024_p10_abc123".into()],
            downloaded: vec![],
            failures,
            error: None,
            instance: Some("pod-1".into()),
            started_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            finished_at: "2026-01-01T00:01:30Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(185), "3m 5s");
        assert_eq!(format_duration(7800), "2h 10m");
    }

    #[test]
    fn test_outcome_pairs() {
        let pairs = outcome(vec![]).key_value_pairs();
        let get = |k: &str| pairs.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(get("Duration").as_deref(), Some("1m 30s"));
        assert_eq!(get("Results").as_deref(), Some("llama_in1024_p10_abc123"));
        assert_eq!(get("Downloaded").as_deref(), Some("-"));
        assert_eq!(get("Instance").as_deref(), Some("pod-1"));
        assert!(get("Error").is_none());
    }

    #[test]
    fn test_outcome_row() {
        let row = outcome(vec!["trial failed".into()]).table_row();
        assert_eq!(row, vec!["success", "1", "0", "1"]);
    }

    #[test]
    fn test_instance_row() {
        let instance = ComputeInstance::new("pod-1", "H100_1", InstanceStatus::Running)
            .with_ssh("203.0.113.7", 40122);
        let row = instance.table_row();
        assert_eq!(row[0], "pod-1");
        assert_eq!(row[2], "RUNNING");
        assert_eq!(row[4], "-");
        assert_eq!(row[5], "203.0.113.7:40122");
        assert_eq!(ComputeInstance::table_headers().len(), row.len());
    }

    #[test]
    fn test_render_table() {
        let instances = vec![ComputeInstance::new("pod-1", "H100_1", InstanceStatus::Exited)];
        let rendered = render_table(&instances).to_string();
        assert!(rendered.contains("pod-1"));
        assert!(rendered.contains("EXITED"));
    }
}
