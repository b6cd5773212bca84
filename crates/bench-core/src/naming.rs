//! Result naming
//!
//! A result name combines the plan entry name, the dataset-shape settings a human
//! cares about, and a short digest of the whole trial bag. The digest keeps names
//! distinct when two trials differ only in settings that are not part of the
//! readable prefix.

use crate::args::ArgMap;

/// Readable name components, in order, as `(key, prefix)`
const NAME_PARTS: &[(&str, &str)] = &[
    ("random_input_len", "in"),
    ("random_output_len", "out"),
    ("num_prompts", "p"),
    ("max_concurrency", "c"),
];

/// Length of the hex digest suffix
const DIGEST_LEN: usize = 6;

/// Build the result name for one trial of a plan entry.
///
/// Deterministic: identical entry names and trial bags always produce identical names,
/// regardless of the order keys were inserted in.
pub fn result_name(entry_name: &str, trial: &ArgMap) -> String {
    let mut parts = vec![entry_name.to_string()];

    for (key, prefix) in NAME_PARTS {
        if let Some(value) = trial.get(key) {
            parts.push(format!("{}{}", prefix, value));
        }
    }

    parts.push(trial_digest(trial));
    parts.join("_")
}

/// First six hex digits of the MD5 of the canonical trial rendering
pub fn trial_digest(trial: &ArgMap) -> String {
    let digest = format!("{:x}", md5::compute(trial.canonical_string().as_bytes()));
    digest[..DIGEST_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgValue;
    use proptest::prelude::*;

    fn trial() -> ArgMap {
        ArgMap::new()
            .with("dataset_name", "random")
            .with("random_input_len", 1024)
            .with("random_output_len", 128)
            .with("num_prompts", 100)
            .with("max_concurrency", 16)
    }

    #[test]
    fn test_readable_parts() {
        let name = result_name("llama_TP1_DP1", &trial());
        assert!(name.starts_with("llama_TP1_DP1_in1024_out128_p100_c16_"));
        assert_eq!(name.rsplit('_').next().map(str::len), Some(DIGEST_LEN));
    }

    #[test]
    fn test_missing_parts_are_skipped() {
        let bag = ArgMap::new().with("num_prompts", 10);
        let name = result_name("run", &bag);
        assert!(name.starts_with("run_p10_"));
        assert_eq!(name.split('_').count(), 3);
    }

    #[test]
    fn test_hidden_field_changes_name() {
        let a = trial().with("request_rate", "inf");
        let b = trial().with("request_rate", 10);
        assert_ne!(result_name("run", &a), result_name("run", &b));
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let reordered = ArgMap::new()
            .with("max_concurrency", 16)
            .with("num_prompts", 100)
            .with("random_output_len", 128)
            .with("random_input_len", 1024)
            .with("dataset_name", "random");
        assert_eq!(result_name("run", &trial()), result_name("run", &reordered));
    }

    #[test]
    fn test_null_differs_from_absent() {
        let with_null = trial().with("seed", ArgValue::Null);
        assert_ne!(result_name("run", &trial()), result_name("run", &with_null));
    }

    proptest! {
        #[test]
        fn names_are_idempotent(input in 1i64..100_000, output in 1i64..10_000, extra in "[a-z]{0,8}") {
            let bag = ArgMap::new()
                .with("random_input_len", input)
                .with("random_output_len", output)
                .with("tag", extra);
            prop_assert_eq!(result_name("e", &bag), result_name("e", &bag.clone()));
        }

        #[test]
        fn distinct_hidden_fields_give_distinct_names(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            prop_assume!(a != b);
            let left = trial().with("tag", a);
            let right = trial().with("tag", b);
            prop_assert_ne!(result_name("e", &left), result_name("e", &right));
        }
    }
}
