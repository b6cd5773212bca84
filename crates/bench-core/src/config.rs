//! Plan configuration for benchmaq
//!
//! Two document forms describe a benchmark plan:
//!
//! - `benchmark:` freeform entries, each with a serve bag and an explicit list of
//!   trial bags
//! - `runs:` grid entries, where parallelism pairs expand into plan entries and the
//!   lists of context sizes, concurrencies, prompt counts and output lengths expand
//!   into the Cartesian trial set
//!
//! Both forms produce the same [`BenchmarkPlan`].

use crate::args::{ArgMap, ArgValue};
use crate::types::{
    BenchmarkPlan, Engine, ModelDownload, PlanEntry, ResultsPolicy, ServeSpec, TrialSpec,
    DEFAULT_RESULT_DIR, DEFAULT_SERVE_PORT,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Plan sections of a configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Freeform plan entries
    #[serde(default)]
    pub benchmark: Vec<FreeformEntry>,

    /// Grid plan entries
    #[serde(default)]
    pub runs: Vec<GridEntry>,
}

/// Model weights section shared by both forms
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSection {
    pub repo_id: Option<String>,
    pub local_dir: Option<String>,
    pub hf_token: Option<String>,
}

impl ModelSection {
    fn download(&self) -> Option<ModelDownload> {
        match (non_empty(&self.repo_id), non_empty(&self.local_dir)) {
            (Some(repo_id), Some(local_dir)) => Some(ModelDownload {
                repo_id: repo_id.to_string(),
                local_dir: local_dir.to_string(),
                hf_token: non_empty(&self.hf_token).map(str::to_string),
            }),
            _ => None,
        }
    }
}

/// Freeform entry: `{name, engine, model, serve, bench: [..], results}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreeformEntry {
    pub name: Option<String>,
    pub engine: Option<String>,
    #[serde(default)]
    pub model: ModelSection,
    /// Serve settings; `model`, `model_path` and `port` are consumed, the rest forwarded
    #[serde(default)]
    pub serve: ArgMap,
    #[serde(default)]
    pub bench: Vec<ArgMap>,
    #[serde(default)]
    pub results: ResultsPolicy,
}

/// Grid entry: `{name, model, vllm_serve, benchmark}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub vllm_serve: GridServe,
    #[serde(default)]
    pub benchmark: GridBenchmark,
}

/// Grid serve section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridServe {
    pub model_path: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub parallelism_pairs: Vec<ParallelismPair>,
    /// Remaining engine settings
    #[serde(flatten)]
    pub extra: ArgMap,
}

/// One tensor/data/pipeline parallel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelismPair {
    #[serde(default = "one")]
    pub tensor_parallel: u32,
    #[serde(default = "one")]
    pub data_parallel: u32,
    #[serde(default = "one")]
    pub pipeline_parallel: u32,
}

fn one() -> u32 {
    1
}

/// Grid benchmark section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridBenchmark {
    #[serde(default)]
    pub save_results: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub context_size: Vec<u32>,
    #[serde(default)]
    pub concurrency: Vec<u32>,
    #[serde(default)]
    pub num_prompts: Vec<u32>,
    #[serde(default)]
    pub output_len: Vec<u32>,
}

impl Default for GridBenchmark {
    fn default() -> Self {
        Self {
            save_results: false,
            output_dir: default_output_dir(),
            context_size: Vec::new(),
            concurrency: Vec::new(),
            num_prompts: Vec::new(),
            output_len: Vec::new(),
        }
    }
}

fn default_output_dir() -> String {
    DEFAULT_RESULT_DIR.to_string()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn take_string(args: &mut ArgMap, key: &str) -> Option<String> {
    match args.remove(key) {
        Some(ArgValue::Null) | None => None,
        Some(ArgValue::String(s)) if s.trim().is_empty() => None,
        Some(other) => Some(other.to_string()),
    }
}

impl PlanConfig {
    /// Parse the plan sections of a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load the plan sections from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn is_empty(&self) -> bool {
        self.benchmark.is_empty() && self.runs.is_empty()
    }

    /// Expand both forms into one ordered plan, freeform entries first
    pub fn to_plan(&self) -> Result<BenchmarkPlan> {
        if self.is_empty() {
            return Err(Error::config(
                "configuration defines no `benchmark` or `runs` entries",
            ));
        }

        let mut entries = Vec::new();
        for entry in &self.benchmark {
            if let Some(entry) = entry.to_entry()? {
                entries.push(entry);
            }
        }
        for grid in &self.runs {
            entries.extend(grid.to_entries());
        }

        debug!("Expanded configuration into {} plan entries", entries.len());
        Ok(BenchmarkPlan::new(entries))
    }
}

impl FreeformEntry {
    /// Build the plan entry, or `None` when the entry has no trials
    pub fn to_entry(&self) -> Result<Option<PlanEntry>> {
        let name = self.name.clone().unwrap_or_else(|| "benchmark".to_string());
        let engine = match non_empty(&self.engine) {
            Some(engine) => engine.parse::<Engine>()?,
            None => Engine::default(),
        };

        if self.bench.is_empty() {
            warn!("Skipping {}: no bench configurations found", name);
            return Ok(None);
        }

        let mut args = self.serve.clone();
        let model_key = take_string(&mut args, "model");
        let model_path_key = take_string(&mut args, "model_path");
        let explicit_model = model_key.or(model_path_key);
        let port = match args.remove("port") {
            Some(value) => port_from(&value)?,
            None => DEFAULT_SERVE_PORT,
        };

        let download = if explicit_model.is_none() {
            self.model.download()
        } else {
            None
        };
        let model = explicit_model
            .or_else(|| non_empty(&self.model.local_dir).map(str::to_string))
            .or_else(|| non_empty(&self.model.repo_id).map(str::to_string))
            .unwrap_or_default();

        let trials = self
            .bench
            .iter()
            .map(|bag| TrialSpec::new(bag.clone(), self.results.clone()))
            .collect();

        Ok(Some(PlanEntry {
            name,
            engine,
            download,
            serve: ServeSpec::new(model, port).with_args(args),
            trials,
        }))
    }
}

impl GridEntry {
    /// One plan entry per parallelism pair
    pub fn to_entries(&self) -> Vec<PlanEntry> {
        let serve = &self.vllm_serve;
        let model = non_empty(&serve.model_path)
            .or_else(|| non_empty(&self.model.local_dir))
            .or_else(|| non_empty(&self.model.repo_id))
            .unwrap_or_default()
            .to_string();
        let download = if non_empty(&serve.model_path).is_none() {
            self.model.download()
        } else {
            None
        };
        let port = serve.port.unwrap_or(DEFAULT_SERVE_PORT);
        let results = ResultsPolicy {
            save_result: self.benchmark.save_results,
            result_dir: self.benchmark.output_dir.clone(),
        };
        let trials = self.trials(&results);

        serve
            .parallelism_pairs
            .iter()
            .map(|pair| {
                let mut name = format!("{}_TP{}_DP{}", self.name, pair.tensor_parallel, pair.data_parallel);
                if pair.pipeline_parallel > 1 {
                    name.push_str(&format!("_PP{}", pair.pipeline_parallel));
                }
                if self.name.is_empty() {
                    name.clear();
                }

                let mut args = ArgMap::new()
                    .with("tensor_parallel_size", pair.tensor_parallel)
                    .with("pipeline_parallel_size", pair.pipeline_parallel)
                    .with("gpu_memory_utilization", 0.9);
                if pair.data_parallel > 1 {
                    args.insert("data_parallel_size", pair.data_parallel);
                }
                let args = args.merged(&serve.extra);

                PlanEntry {
                    name,
                    engine: Engine::Vllm,
                    download: download.clone(),
                    serve: ServeSpec::new(model.clone(), port).with_args(args),
                    trials: trials.clone(),
                }
            })
            .collect()
    }

    fn trials(&self, results: &ResultsPolicy) -> Vec<TrialSpec> {
        let b = &self.benchmark;
        let mut trials = Vec::new();
        for ctx in &b.context_size {
            for concurrency in &b.concurrency {
                for num_prompts in &b.num_prompts {
                    for output_len in &b.output_len {
                        let args = ArgMap::new()
                            .with("backend", "vllm")
                            .with("endpoint", "/v1/completions")
                            .with("dataset_name", "random")
                            .with("random_input_len", *ctx)
                            .with("random_output_len", *output_len)
                            .with("num_prompts", *num_prompts)
                            .with("max_concurrency", *concurrency)
                            .with("request_rate", "inf")
                            .with("ignore_eos", true)
                            .with("percentile_metrics", "ttft,tpot,itl,e2el");
                        trials.push(TrialSpec::new(args, results.clone()));
                    }
                }
            }
        }
        trials
    }
}

fn port_from(value: &ArgValue) -> Result<u16> {
    value
        .as_i64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| Error::config(format!("invalid serve port: {}", value)))
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_format")]
    pub format: String,

    /// Include the event target in log lines
    #[serde(default)]
    pub show_target: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            show_target: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config(format!("Invalid log level: {}", self.level))),
        }
        match self.format.as_str() {
            "text" | "json" => Ok(()),
            _ => Err(Error::config(format!("Invalid log format: {}", self.format))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::result_name;

    const FREEFORM: &str = r#"
benchmark:
  - name: llama
    engine: vllm
    model:
      repo_id: meta-llama/Llama-3.1-8B
      local_dir: /workspace/models/llama
    serve:
      port: 8001
      tensor_parallel_size: 2
      disable_log_requests: true
      dtype: ~
    bench:
      - random_input_len: 1024
        random_output_len: 128
        num_prompts: 100
        max_concurrency: 16
      - random_input_len: 2048
        random_output_len: 128
        num_prompts: 100
        max_concurrency: 16
    results:
      save_result: true
      result_dir: ./results
"#;

    #[test]
    fn test_freeform_plan() {
        let plan = PlanConfig::from_yaml_str(FREEFORM).unwrap().to_plan().unwrap();
        assert_eq!(plan.entries.len(), 1);

        let entry = &plan.entries[0];
        assert_eq!(entry.name, "llama");
        assert_eq!(entry.serve.model, "/workspace/models/llama");
        assert_eq!(entry.serve.port, 8001);
        assert!(!entry.serve.args.contains_key("port"));
        assert_eq!(
            entry.serve.args.to_cli_flags(),
            vec!["--tensor-parallel-size", "2", "--disable-log-requests"]
        );
        assert_eq!(entry.download.as_ref().map(|d| d.repo_id.as_str()), Some("meta-llama/Llama-3.1-8B"));
        assert_eq!(entry.trials.len(), 2);
        assert_eq!(plan.result_dirs(), vec!["./results"]);

        let names: Vec<_> = entry.trials.iter().map(|t| result_name(&entry.name, &t.args)).collect();
        assert_ne!(names[0], names[1]);
    }

    #[test]
    fn test_explicit_model_skips_download() {
        let yaml = r#"
benchmark:
  - name: qwen
    engine: sglang
    model:
      repo_id: Qwen/Qwen2.5-7B
      local_dir: /models/qwen
    serve:
      model_path: /mnt/qwen
    bench:
      - num_prompts: 10
"#;
        let plan = PlanConfig::from_yaml_str(yaml).unwrap().to_plan().unwrap();
        let entry = &plan.entries[0];
        assert_eq!(entry.engine, Engine::Sglang);
        assert_eq!(entry.serve.model, "/mnt/qwen");
        assert_eq!(entry.serve.port, DEFAULT_SERVE_PORT);
        assert!(entry.download.is_none());
        assert!(!entry.trials[0].results.save_result);
    }

    #[test]
    fn test_entry_without_trials_is_dropped() {
        let yaml = "benchmark:\n  - name: empty\n    serve:\n      model: m\n";
        let plan = PlanConfig::from_yaml_str(yaml).unwrap().to_plan().unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_entry_without_model_is_kept_but_not_runnable() {
        let yaml = "benchmark:\n  - name: nomodel\n    bench:\n      - num_prompts: 1\n";
        let plan = PlanConfig::from_yaml_str(yaml).unwrap().to_plan().unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert!(!plan.entries[0].is_runnable());
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let yaml = "benchmark:\n  - name: x\n    engine: tgi\n    serve:\n      model: m\n    bench:\n      - num_prompts: 1\n";
        let err = PlanConfig::from_yaml_str(yaml).unwrap().to_plan().unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_empty_document_rejected() {
        let err = PlanConfig::from_yaml_str("{}").unwrap().to_plan().unwrap_err();
        assert!(err.to_string().contains("no `benchmark` or `runs`"));
    }

    #[test]
    fn test_grid_plan() {
        let yaml = r#"
runs:
  - name: llama
    model:
      repo_id: meta-llama/Llama-3.1-8B
      local_dir: /models/llama
    vllm_serve:
      port: 8000
      max_model_len: 8192
      parallelism_pairs:
        - tensor_parallel: 1
          data_parallel: 1
        - tensor_parallel: 2
          data_parallel: 2
          pipeline_parallel: 2
    benchmark:
      save_results: true
      output_dir: ./grid
      context_size: [1024, 2048]
      concurrency: [8, 16]
      num_prompts: [100]
      output_len: [128]
"#;
        let plan = PlanConfig::from_yaml_str(yaml).unwrap().to_plan().unwrap();
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[0].name, "llama_TP1_DP1");
        assert_eq!(plan.entries[1].name, "llama_TP2_DP2_PP2");
        assert_eq!(plan.entries[0].serve.model, "/models/llama");
        assert!(plan.entries[0].download.is_some());

        let flags = plan.entries[1].serve.args.to_cli_flags();
        assert!(flags.windows(2).any(|w| w == ["--data-parallel-size", "2"]));
        assert!(flags.windows(2).any(|w| w == ["--max-model-len", "8192"]));
        assert!(!plan.entries[0].serve.args.contains_key("data_parallel_size"));

        let trials = &plan.entries[0].trials;
        assert_eq!(trials.len(), 4);
        assert_eq!(trials[0].args.get("random_input_len"), Some(&ArgValue::Int(1024)));
        assert_eq!(trials[1].args.get("max_concurrency"), Some(&ArgValue::Int(16)));
        assert_eq!(trials[2].args.get("random_input_len"), Some(&ArgValue::Int(2048)));
        assert!(trials.iter().all(|t| t.results.save_result && t.results.result_dir == "./grid"));
    }

    #[test]
    fn test_grid_serves_hub_id_without_local_dir() {
        let yaml = "runs:\n  - name: qwen\n    model:\n      repo_id: Qwen/Qwen2.5-7B\n    vllm_serve:\n      parallelism_pairs:\n        - tensor_parallel: 1\n";
        let plan = PlanConfig::from_yaml_str(yaml).unwrap().to_plan().unwrap();
        assert_eq!(plan.entries[0].serve.model, "Qwen/Qwen2.5-7B");
        assert!(plan.entries[0].download.is_none());
        assert!(plan.entries[0].is_runnable());
    }

    #[test]
    fn test_grid_without_name_not_runnable() {
        let yaml = "runs:\n  - vllm_serve:\n      model_path: /m\n      parallelism_pairs:\n        - tensor_parallel: 1\n";
        let plan = PlanConfig::from_yaml_str(yaml).unwrap().to_plan().unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert!(!plan.entries[0].is_runnable());
    }

    #[test]
    fn test_logging_validation() {
        let mut logging = LoggingConfig::default();
        assert!(logging.validate().is_ok());
        logging.level = "loud".into();
        assert!(logging.validate().is_err());
        logging.level = "debug".into();
        logging.format = "xml".into();
        assert!(logging.validate().is_err());
    }
}
