//! Small helpers for treating `serde_json::Value` like a dynamically typed value.

use serde_json::{Number, Value};

/// Largest integer a double represents exactly; integral results beyond it
/// stay floating point.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Loose truthiness: `null`, `false`, `0`, `NaN` and `""` are falsy, everything
/// else (including empty arrays and objects) is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0 && !n.is_nan()).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form of a value. Strings are returned verbatim, integral numbers
/// render without a fractional part, containers render as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => format_number(number),
        Value::String(text) => text.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn format_number(number: &Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float.abs() <= MAX_SAFE_INTEGER => {
            format!("{}", float as i64)
        }
        Some(float) => float.to_string(),
        None => number.to_string(),
    }
}

/// Converts a double into a JSON number, preferring an integer representation
/// when the value is integral. Non-finite values have no JSON form and map to
/// `None`.
pub fn number_value(float: f64) -> Option<Value> {
    if !float.is_finite() {
        return None;
    }
    if float.fract() == 0.0 && float.abs() <= MAX_SAFE_INTEGER {
        return Some(Value::from(float as i64));
    }
    Number::from_f64(float).map(Value::Number)
}
