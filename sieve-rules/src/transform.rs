//! Scalar coercions applied to mapped fields after NA normalisation.
//!
//! Every transform is total: bad input degrades to `null` instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::{is_truthy, number_value, stringify};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Trim,
    Lower,
    Upper,
    Number,
    Bool01,
    String,
    #[default]
    #[serde(other)]
    None,
}

impl Transform {
    pub fn apply(self, value: Value) -> Value {
        match self {
            Transform::None => value,
            Transform::Trim => map_text(value, |text| text.trim().to_string()),
            Transform::Lower => map_text(value, |text| text.to_lowercase()),
            Transform::Upper => map_text(value, |text| text.to_uppercase()),
            Transform::Number => to_number(&value),
            Transform::Bool01 => Value::from(u8::from(is_truthy(&value))),
            Transform::String => match value {
                Value::Null => Value::String(String::new()),
                other => Value::String(stringify(&other)),
            },
        }
    }
}

fn map_text(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(text) => Value::String(f(&text)),
        other => Value::String(f(&stringify(&other))),
    }
}

fn to_number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::Bool(flag) => Value::from(u8::from(*flag)),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Value::Null;
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(number_value)
                .unwrap_or(Value::Null)
        }
        Value::Null | Value::Array(_) | Value::Object(_) => Value::Null,
    }
}
