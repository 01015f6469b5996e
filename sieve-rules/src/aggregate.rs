use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::na::NaNormalizer;
use crate::rule::{AggregateMode, AggregateSpec};
use crate::source::Resolver;
use crate::value::stringify;

/// Inputs shared by every reduction of one rule.
pub struct AggregateScope<'r, 'a> {
    pub resolver: &'r Resolver<'a>,
    pub document: &'r Value,
    pub na: &'r NaNormalizer,
    pub label: &'r str,
}

/// Reduces mapped records to the rule's result. Per-record failures are
/// pushed to `warnings` and the record is left out.
pub async fn aggregate(
    spec: &AggregateSpec,
    records: Vec<Value>,
    scope: &AggregateScope<'_, '_>,
    warnings: &mut Vec<String>,
) -> Value {
    match spec.mode {
        AggregateMode::First => records.into_iter().next().unwrap_or(Value::Null),
        AggregateMode::Count => Value::from(records.len()),
        AggregateMode::ObjectByKey => object_by_key(spec, records, scope, warnings).await,
        AggregateMode::Set => distinct_values(spec, records, scope, warnings).await,
        AggregateMode::Array | AggregateMode::Unknown => Value::Array(records),
    }
}

/// Mode-specific emptiness of an aggregate result.
pub fn is_empty(mode: AggregateMode, result: &Value) -> bool {
    match (mode, result) {
        (AggregateMode::Count, value) => value.as_f64().map_or(true, |n| n == 0.0),
        (AggregateMode::First, value) => value.is_null(),
        (_, Value::Array(items)) => items.is_empty(),
        (_, Value::Object(map)) => map.is_empty(),
        (_, Value::Null) => true,
        _ => false,
    }
}

async fn object_by_key(
    spec: &AggregateSpec,
    records: Vec<Value>,
    scope: &AggregateScope<'_, '_>,
    warnings: &mut Vec<String>,
) -> Value {
    let Some(key_source) = spec.key_source() else {
        warnings.push(format!(
            "rule {}: objectByKey requires keyExpr, result left empty",
            scope.label
        ));
        return Value::Object(Map::new());
    };

    let mut grouped = Map::new();
    for (position, record) in records.into_iter().enumerate() {
        match scope
            .resolver
            .evaluate(&key_source, scope.document, Some(&record))
            .await
        {
            Ok(key) => {
                grouped.insert(stringify(&key), record);
            }
            Err(err) => warnings.push(format!(
                "rule {}: record {position} skipped, key evaluation failed: {err}",
                scope.label
            )),
        }
    }
    Value::Object(grouped)
}

async fn distinct_values(
    spec: &AggregateSpec,
    records: Vec<Value>,
    scope: &AggregateScope<'_, '_>,
    warnings: &mut Vec<String>,
) -> Value {
    let value_source = spec.value_source();
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();

    for (position, record) in records.iter().enumerate() {
        let value = match &value_source {
            Some(source) => match scope
                .resolver
                .evaluate(source, scope.document, Some(record))
                .await
            {
                Ok(value) => value,
                Err(err) => {
                    warnings.push(format!(
                        "rule {}: record {position} skipped, value evaluation failed: {err}",
                        scope.label
                    ));
                    continue;
                }
            },
            None => first_field(record),
        };

        let value = scope.na.normalize(value);
        if value.is_null() {
            continue;
        }
        let text = stringify(&value);
        if text.trim().is_empty() {
            continue;
        }
        if seen.insert(text.clone()) {
            distinct.push(Value::String(text));
        }
    }

    Value::Array(distinct)
}

/// Value of the first key in insertion order; non-object records stand for
/// themselves.
fn first_field(record: &Value) -> Value {
    match record {
        Value::Object(fields) => fields.values().next().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}
