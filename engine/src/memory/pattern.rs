//! Learned patterns keyed by tool and parameter shape

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Generalized identity of a tool call
///
/// The shape keeps parameter names and JSON types but drops values, except
/// for `operation` whose value selects what the tool actually does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    pub tool: String,
    pub shape: String,
}

impl PatternKey {
    pub fn new(tool: impl Into<String>, shape: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            shape: shape.into(),
        }
    }

    pub fn from_params(tool: &str, params: &Map<String, Value>) -> Self {
        let mut parts: Vec<String> = params
            .iter()
            .map(|(key, value)| match (key.as_str(), value) {
                ("operation", Value::String(op)) => format!("operation={}", op),
                _ => format!("{}:{}", key, json_type(value)),
            })
            .collect();
        parts.sort();

        let shape = if parts.is_empty() {
            "-".to_string()
        } else {
            parts.join(",")
        };

        Self::new(tool, shape)
    }

    /// Storage key under the `pattern/` namespace
    pub fn storage_key(&self) -> String {
        format!("pattern/{}/{}", self.tool, self.shape)
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.tool, self.shape)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Aggregated success statistic for one pattern key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub key: PatternKey,
    pub success_rate: f64,
    pub sample_count: u64,
    pub last_confidence: f64,
    pub updated_at: DateTime<Utc>,
}

impl LearnedPattern {
    pub fn new(key: PatternKey) -> Self {
        Self {
            key,
            success_rate: 0.0,
            sample_count: 0,
            last_confidence: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Fold one terminal outcome into the moving average
    ///
    /// The first sample sets the rate directly; later samples use
    /// `rate = alpha * sample + (1 - alpha) * rate`.
    pub fn apply(&mut self, success: bool, alpha: f64) {
        let sample = if success { 1.0 } else { 0.0 };
        self.success_rate = if self.sample_count == 0 {
            sample
        } else {
            alpha * sample + (1.0 - alpha) * self.success_rate
        };
        self.sample_count += 1;
        self.last_confidence = self.confidence();
        self.updated_at = Utc::now();
    }

    /// Success rate discounted by how little evidence backs it
    pub fn confidence(&self) -> f64 {
        let n = self.sample_count as f64;
        self.success_rate * n / (n + 1.0)
    }
}

/// Read-only copy of the pattern index used for one planning run
#[derive(Debug, Clone, Default)]
pub struct PatternSnapshot {
    patterns: HashMap<PatternKey, LearnedPattern>,
}

impl PatternSnapshot {
    pub fn from_patterns(patterns: impl IntoIterator<Item = LearnedPattern>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| (p.key.clone(), p)).collect(),
        }
    }

    pub fn get(&self, key: &PatternKey) -> Option<&LearnedPattern> {
        self.patterns.get(key)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_shape_ignores_values_but_keeps_operation() {
        let a = PatternKey::from_params(
            "file_operations",
            &params(json!({"operation": "read_file", "path": "a.txt"})),
        );
        let b = PatternKey::from_params(
            "file_operations",
            &params(json!({"path": "b/c.txt", "operation": "read_file"})),
        );
        let c = PatternKey::from_params(
            "file_operations",
            &params(json!({"operation": "delete_file", "path": "a.txt"})),
        );

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.shape, "operation=read_file,path:string");
    }

    #[test]
    fn test_empty_params_shape() {
        let key = PatternKey::from_params("noop", &Map::new());
        assert_eq!(key.shape, "-");
        assert_eq!(key.storage_key(), "pattern/noop/-");
    }

    #[test]
    fn test_ewma_first_sample_then_weighted() {
        let mut pattern = LearnedPattern::new(PatternKey::new("t", "-"));

        pattern.apply(true, 0.3);
        assert_eq!(pattern.success_rate, 1.0);
        assert_eq!(pattern.sample_count, 1);
        assert!((pattern.last_confidence - 0.5).abs() < 1e-9);

        pattern.apply(false, 0.3);
        assert!((pattern.success_rate - 0.7).abs() < 1e-9);
        assert_eq!(pattern.sample_count, 2);

        pattern.apply(true, 0.3);
        assert!((pattern.success_rate - 0.79).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_grows_with_samples() {
        let mut pattern = LearnedPattern::new(PatternKey::new("t", "-"));
        let mut previous = 0.0;
        for _ in 0..5 {
            pattern.apply(true, 0.3);
            assert!(pattern.confidence() > previous);
            previous = pattern.confidence();
        }
    }
}
