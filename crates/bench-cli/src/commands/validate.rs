//! Configuration checking

use crate::output::{Formattable, OutputFormat, OutputFormatter};
use anyhow::Result;
use bench_core::result_name;
use bench_runner::RunConfig;
use serde::Serialize;
use std::path::Path;

/// One trial of the expanded plan
#[derive(Debug, Serialize)]
pub struct TrialRow {
    pub entry: String,
    pub engine: String,
    pub model: String,
    pub port: u16,
    pub result_name: String,
}

impl Formattable for TrialRow {
    fn table_headers() -> Vec<String> {
        vec![
            "Entry".to_string(),
            "Engine".to_string(),
            "Model".to_string(),
            "Port".to_string(),
            "Result Name".to_string(),
        ]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.entry.clone(),
            self.engine.clone(),
            self.model.clone(),
            self.port.to_string(),
            self.result_name.clone(),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        Self::table_headers().into_iter().zip(self.table_row()).collect()
    }
}

/// Every trial the plan would run, in execution order
pub fn trial_rows(config: &RunConfig) -> Result<Vec<TrialRow>> {
    let plan = config.to_plan()?;
    Ok(plan
        .entries
        .iter()
        .filter(|entry| entry.is_runnable())
        .flat_map(|entry| {
            entry.trials.iter().map(move |trial| TrialRow {
                entry: entry.name.clone(),
                engine: entry.engine.to_string(),
                model: entry.serve.model.clone(),
                port: entry.serve.port,
                result_name: result_name(&entry.name, &trial.args),
            })
        })
        .collect())
}

pub fn validate(config_path: &Path, format: OutputFormat, verbose: bool) -> Result<i32> {
    let config = super::load_config(config_path, verbose)?;
    config.validate()?;

    let rows = trial_rows(&config)?;
    let formatter = OutputFormatter::new(format);
    formatter.print_list(&rows)?;
    if format == OutputFormat::Table {
        formatter.print_success(&format!(
            "{} is valid ({} trials)",
            config_path.display(),
            rows.len()
        ))?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_rows() {
        let config = RunConfig::from_yaml_str(
            r#"
benchmark:
  - name: llama
    engine: sglang
    serve:
      model: meta-llama/Llama-3.1-8B
      port: 30000
    bench:
      - random_input_len: 1024
        num_prompts: 10
      - random_input_len: 2048
        num_prompts: 10
  - name: ""
    serve:
      model: skipped
      port: 8000
    bench:
      - num_prompts: 1
"#,
        )
        .unwrap();

        let rows = trial_rows(&config).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].entry, "llama");
        assert_eq!(rows[0].engine, "sglang");
        assert_eq!(rows[0].port, 30000);
        assert!(rows[0].result_name.starts_with("llama_"));
        assert_ne!(rows[0].result_name, rows[1].result_name);
        assert_eq!(TrialRow::table_headers().len(), rows[0].table_row().len());
    }
}
