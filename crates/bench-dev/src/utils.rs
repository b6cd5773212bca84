//! Utility functions for development and testing

use bench_core::{ArgMap, BenchmarkPlan, Engine, PlanEntry, ResultsPolicy, ServeSpec, TrialSpec};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Setup test logging with appropriate levels
pub fn setup_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bench_dev=debug,bench_core=debug,bench_runtime=debug,bench_cloud=debug,bench_remote=debug,bench_runner=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A vLLM plan entry with `trials` random-dataset trials that persist into `./results`
pub fn sample_entry(name: &str, port: u16, trials: usize) -> PlanEntry {
    let trials = (0..trials)
        .map(|i| {
            let args = ArgMap::new()
                .with("dataset_name", "random")
                .with("random_input_len", 1024 * (i as i64 + 1))
                .with("random_output_len", 128)
                .with("num_prompts", 100)
                .with("max_concurrency", 16);
            TrialSpec::new(args, ResultsPolicy::saving("./results"))
        })
        .collect();

    PlanEntry {
        name: name.to_string(),
        engine: Engine::Vllm,
        download: None,
        serve: ServeSpec::new("meta-llama/Llama-3.1-8B", port)
            .with_args(ArgMap::new().with("tensor_parallel_size", 1)),
        trials,
    }
}

/// A plan of `(name, trials)` entries all serving on `port`
pub fn sample_plan(entries: &[(&str, usize)], port: u16) -> BenchmarkPlan {
    BenchmarkPlan::new(
        entries
            .iter()
            .map(|(name, trials)| sample_entry(name, port, *trials))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_plan_shape() {
        let plan = sample_plan(&[("a", 2), ("b", 1)], 8000);
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.trial_count(), 3);
        assert_eq!(plan.result_dirs(), vec!["./results"]);
        assert!(plan.entries.iter().all(|e| e.serve.port == 8000));
    }
}
