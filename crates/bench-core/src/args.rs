//! Engine argument maps and their translation into command-line flags
//!
//! Serve and benchmark settings are open-ended key/value bags. The controller only
//! inspects a handful of keys; everything else is forwarded to the external tool.
//! Insertion order is preserved so generated command lines follow the document order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single value in an argument map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Explicitly absent value, never emitted as a flag
    Null,
}

impl ArgValue {
    /// Integer view, accepting numeric strings
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            ArgValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String view of string values only
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// True for `Null` and for empty strings
    pub fn is_empty(&self) -> bool {
        match self {
            ArgValue::Null => true,
            ArgValue::String(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Bool(v) => write!(f, "{}", v),
            ArgValue::Int(v) => write!(f, "{}", v),
            ArgValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::String(s) => f.write_str(s),
            ArgValue::Null => Ok(()),
        }
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<u16> for ArgValue {
    fn from(v: u16) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::String(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::String(v)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ArgValue::Null)
    }
}

/// Ordered mapping from snake_case setting names to values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgMap(IndexMap<String, ArgValue>);

impl ArgMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value, keeping the original position of an existing key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ArgValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.0.get(key)
    }

    /// Remove a key without disturbing the order of the remaining entries
    pub fn remove(&mut self, key: &str) -> Option<ArgValue> {
        self.0.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` on top of this map; keys in `other` win
    pub fn merged(&self, other: &ArgMap) -> ArgMap {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.insert(k.clone(), v.clone());
        }
        out
    }

    /// Translate into the external tools' flag convention
    pub fn to_cli_flags(&self) -> Vec<String> {
        to_cli_flags(self)
    }

    /// Stable `key=value` rendering with keys sorted, independent of insertion order
    pub fn canonical_string(&self) -> String {
        let mut pairs: Vec<(&String, &ArgValue)> = self.0.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
            .into_iter()
            .map(|(k, v)| match v {
                ArgValue::Null => format!("{}=null", k),
                ArgValue::String(s) => format!("{}={:?}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<K: Into<String>, V: Into<ArgValue>> FromIterator<(K, V)> for ArgMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ArgMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Translate an argument map into command-line flags.
///
/// `snake_case` keys become `--kebab-case` flags. `true` emits the bare flag,
/// `false` and null are omitted, anything else emits the flag followed by its
/// stringified value.
pub fn to_cli_flags(args: &ArgMap) -> Vec<String> {
    let mut flags = Vec::with_capacity(args.len() * 2);
    for (key, value) in args.iter() {
        let flag = format!("--{}", key.replace('_', "-"));
        match value {
            ArgValue::Bool(true) => flags.push(flag),
            ArgValue::Bool(false) | ArgValue::Null => {}
            other => {
                flags.push(flag);
                flags.push(other.to_string());
            }
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flag_translation() {
        let args = ArgMap::new()
            .with("tensor_parallel_size", 4)
            .with("disable_log_requests", true)
            .with("dtype", ArgValue::Null);

        assert_eq!(
            args.to_cli_flags(),
            vec!["--tensor-parallel-size", "4", "--disable-log-requests"]
        );
    }

    #[test]
    fn test_false_and_strings() {
        let args = ArgMap::new()
            .with("enable_expert_parallel", false)
            .with("request_rate", "inf")
            .with("gpu_memory_utilization", 0.9)
            .with("max_model_len", ArgValue::from(None::<i64>));

        assert_eq!(
            args.to_cli_flags(),
            vec!["--request-rate", "inf", "--gpu-memory-utilization", "0.9"]
        );
    }

    #[test]
    fn test_integral_float_rendering() {
        assert_eq!(ArgValue::Float(1.0).to_string(), "1.0");
        assert_eq!(ArgValue::Float(f64::INFINITY).to_string(), "inf");
    }

    #[test]
    fn test_yaml_values() {
        let args: ArgMap = serde_yaml::from_str(
            "tensor_parallel_size: 2\ndtype: ~\nignore_eos: true\nrequest_rate: inf\nratio: 0.5\n",
        )
        .unwrap();

        assert_eq!(args.get("tensor_parallel_size"), Some(&ArgValue::Int(2)));
        assert_eq!(args.get("dtype"), Some(&ArgValue::Null));
        assert_eq!(args.get("ignore_eos"), Some(&ArgValue::Bool(true)));
        assert_eq!(args.get("request_rate"), Some(&ArgValue::String("inf".into())));
        assert_eq!(args.get("ratio"), Some(&ArgValue::Float(0.5)));
        // Document order is kept
        let keys: Vec<_> = args.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["tensor_parallel_size", "dtype", "ignore_eos", "request_rate", "ratio"]);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut args = ArgMap::new().with("a", 1).with("port", 8000).with("b", 2);
        assert_eq!(args.remove("port"), Some(ArgValue::Int(8000)));
        let keys: Vec<_> = args.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn test_canonical_string_ignores_order() {
        let a = ArgMap::new().with("x", 1).with("y", "z");
        let b = ArgMap::new().with("y", "z").with("x", 1);
        assert_eq!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn test_merged_overrides() {
        let base = ArgMap::new().with("dataset_name", "random").with("num_prompts", 10);
        let merged = base.merged(&ArgMap::new().with("num_prompts", 50));
        assert_eq!(merged.get("num_prompts"), Some(&ArgValue::Int(50)));
        assert_eq!(merged.get("dataset_name"), Some(&ArgValue::from("random")));
    }

    fn arg_value() -> impl Strategy<Value = ArgValue> {
        prop_oneof![
            any::<bool>().prop_map(ArgValue::Bool),
            any::<i64>().prop_map(ArgValue::Int),
            "[a-z0-9./]{1,12}".prop_map(ArgValue::String),
            Just(ArgValue::Null),
        ]
    }

    proptest! {
        #[test]
        fn flags_account_for_every_key(
            entries in proptest::collection::vec(("[a-z]{1,6}(_[a-z]{1,6}){0,2}", arg_value()), 0..8)
        ) {
            let args: ArgMap = entries.into_iter().collect();
            let flags = args.to_cli_flags();

            let expected: usize = args
                .iter()
                .map(|(_, v)| match v {
                    ArgValue::Bool(true) => 1,
                    ArgValue::Bool(false) | ArgValue::Null => 0,
                    _ => 2,
                })
                .sum();
            prop_assert_eq!(flags.len(), expected);

            for (key, value) in args.iter() {
                let flag = format!("--{}", key.replace('_', "-"));
                let present = flags.contains(&flag);
                let emitted = !matches!(value, ArgValue::Bool(false) | ArgValue::Null);
                prop_assert_eq!(present, emitted);
            }
        }
    }
}
