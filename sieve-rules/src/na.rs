use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::stringify;

/// Configuration that canonicalises "empty-like" values to `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NaPolicy {
    #[serde(default)]
    pub enabled: bool,
    /// Tokens treated as NA, compared case-insensitively.
    #[serde(default)]
    pub values: Vec<String>,
}

impl NaPolicy {
    pub fn enabled(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            enabled: true,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Builds the predicate used during a run.
    pub fn normalizer(&self) -> NaNormalizer {
        NaNormalizer {
            enabled: self.enabled,
            tokens: self.values.iter().map(|token| token.to_lowercase()).collect(),
        }
    }
}

/// Run-time form of [`NaPolicy`] with pre-folded tokens.
#[derive(Debug, Clone, Default)]
pub struct NaNormalizer {
    enabled: bool,
    tokens: HashSet<String>,
}

impl NaNormalizer {
    pub fn is_na(&self, value: &Value) -> bool {
        if !self.enabled {
            return false;
        }
        match value {
            Value::Null => true,
            Value::String(text) if text.trim().is_empty() => true,
            other => self.tokens.contains(&stringify(other).to_lowercase()),
        }
    }

    pub fn normalize(&self, value: Value) -> Value {
        if self.is_na(&value) {
            Value::Null
        } else {
            value
        }
    }
}
