use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::expression::Expressions;
use crate::path::FieldPath;
use crate::store::Stores;
use crate::value::{number_value, stringify};

/// How a [`TypedSource`] obtains its value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Msg,
    Flow,
    Global,
    Env,
    Path,
    #[default]
    Jsonata,
    Str,
    Num,
    Bool,
    Json,
    /// Unknown kinds return the configured value unchanged.
    #[serde(other)]
    Literal,
}

/// Discriminated value description shared by select, filter, map and
/// aggregate fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedSource {
    #[serde(rename = "type", default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub value: Value,
}

impl TypedSource {
    pub fn new(kind: SourceKind, value: Value) -> Self {
        Self { kind, value }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::new(SourceKind::Path, Value::String(path.into()))
    }

    pub fn jsonata(expr: impl Into<String>) -> Self {
        Self::new(SourceKind::Jsonata, Value::String(expr.into()))
    }

    fn text(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => stringify(other),
        }
    }
}

/// Resolves typed sources for one run.
///
/// `msg` always reads the running message, even when the document a rule
/// works against is a different root.
pub struct Resolver<'a> {
    message: &'a Value,
    stores: &'a Stores,
    expressions: &'a Expressions,
}

impl<'a> Resolver<'a> {
    pub fn new(message: &'a Value, stores: &'a Stores, expressions: &'a Expressions) -> Self {
        Self {
            message,
            stores,
            expressions,
        }
    }

    /// Only the `jsonata` kind can fail; every other lookup degrades to `null`.
    pub async fn evaluate(
        &self,
        source: &TypedSource,
        document: &Value,
        row: Option<&Value>,
    ) -> Result<Value> {
        let value = match source.kind {
            SourceKind::Msg => FieldPath::new(source.text()).lookup(self.message),
            SourceKind::Flow => self.stores.flow.get(&FieldPath::new(source.text())),
            SourceKind::Global => self.stores.global.get(&FieldPath::new(source.text())),
            SourceKind::Env => Value::String(std::env::var(source.text()).unwrap_or_default()),
            SourceKind::Path => FieldPath::new(source.text()).lookup(row.unwrap_or(document)),
            SourceKind::Jsonata => {
                let context = row.unwrap_or(document);
                self.expressions
                    .evaluate(&source.text(), context, document)
                    .await?
            }
            SourceKind::Str => Value::String(source.text()),
            SourceKind::Num => coerce_number(&source.value),
            SourceKind::Bool => Value::Bool(source.text() == "true"),
            SourceKind::Json => match &source.value {
                Value::String(text) => serde_json::from_str(text).unwrap_or(Value::Null),
                other => other.clone(),
            },
            SourceKind::Literal => source.value.clone(),
        };
        Ok(value)
    }
}

fn coerce_number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::Bool(flag) => Value::from(u8::from(*flag)),
        Value::String(text) if text.trim().is_empty() => Value::from(0),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(number_value)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
