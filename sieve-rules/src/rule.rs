use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::na::NaPolicy;
use crate::path::FieldPath;
use crate::source::{SourceKind, TypedSource};
use crate::transform::Transform;

/// Immutable rule-set snapshot executed against each message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    /// Where the logical root of the message comes from.
    #[serde(default)]
    pub source: SourceSpec,
    /// Empty-value canonicalisation applied while mapping.
    #[serde(default)]
    pub na_policy: NaPolicy,
    /// Rules, executed strictly in order.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: SourceSpec) -> Self {
        self.source = source;
        self
    }

    pub fn with_na_policy(mut self, na_policy: NaPolicy) -> Self {
        self.na_policy = na_policy;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every `jsonata` expression the rule set can evaluate, paired with the
    /// label of the rule it belongs to (`source` for the root expression).
    pub fn expressions(&self) -> Vec<(String, String)> {
        let mut found = Vec::new();
        if self.source.kind == RootKind::Jsonata && !self.source.expression().trim().is_empty() {
            found.push(("source".to_string(), self.source.expression().to_string()));
        }

        for (index, rule) in self.rules.iter().enumerate() {
            let label = rule.label(index);
            let mut sources = Vec::new();
            if rule.select_type == SelectKind::Jsonata && !rule.select.trim().is_empty() {
                sources.push(TypedSource::jsonata(rule.select.trim()));
            }
            sources.extend(rule.filter_source());
            for field in &rule.map {
                sources.push(field.source());
                sources.extend(field.gate());
            }
            sources.extend(rule.aggregate.key_source());
            sources.extend(rule.aggregate.value_source());

            for source in sources {
                if let (SourceKind::Jsonata, Value::String(expr)) = (source.kind, source.value) {
                    found.push((label.clone(), expr));
                }
            }
        }
        found
    }
}

/// Origin of the document root a run works against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootKind {
    Flow,
    Global,
    Jsonata,
    Path,
    /// A path inside the message (empty path: the whole message). Unknown
    /// types fall back here.
    #[default]
    #[serde(other)]
    Msg,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceSpec {
    #[serde(rename = "type", default)]
    pub kind: RootKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub expr: Option<String>,
}

impl SourceSpec {
    pub fn msg(path: impl Into<String>) -> Self {
        Self {
            kind: RootKind::Msg,
            path: Some(path.into()),
            expr: None,
        }
    }

    pub fn jsonata(expr: impl Into<String>) -> Self {
        Self {
            kind: RootKind::Jsonata,
            path: None,
            expr: Some(expr.into()),
        }
    }

    /// Expression text for the `jsonata` kind, falling back to `path`.
    pub fn expression(&self) -> &str {
        self.expr
            .as_deref()
            .filter(|expr| !expr.trim().is_empty())
            .or(self.path.as_deref())
            .unwrap_or("")
    }

    pub fn field_path(&self) -> FieldPath {
        FieldPath::new(self.path.clone().unwrap_or_default())
    }
}

/// How a rule's `select` text is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectKind {
    #[default]
    Jsonata,
    Path,
    /// Anything else selects the root itself.
    #[serde(other)]
    Root,
}

/// Policy applied when a rule produces an empty result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnEmpty {
    Ok,
    Error,
    #[default]
    #[serde(other)]
    Warn,
}

/// Whether a rule-level error stops the remaining rules of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Stop,
    #[default]
    #[serde(other)]
    Continue,
}

/// Declarative select → filter → map → aggregate → output unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Human readable name used in warnings and logs.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub select_type: SelectKind,
    #[serde(default)]
    pub select: String,
    #[serde(default = "default_expr_kind")]
    pub filter_type: SourceKind,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub map: Vec<MapField>,
    #[serde(default)]
    pub aggregate: AggregateSpec,
    #[serde(default)]
    pub output: OutputSpec,
    #[serde(default)]
    pub on_empty: OnEmpty,
    #[serde(default)]
    pub on_error: OnError,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter_type: SourceKind::Jsonata,
            ..Self::default()
        }
    }

    /// Label used in messages: the name, or `#<index>` for unnamed rules.
    pub fn label(&self, index: usize) -> String {
        if self.name.trim().is_empty() {
            format!("#{index}")
        } else {
            self.name.clone()
        }
    }

    /// The filter gate, if one is configured.
    pub fn filter_source(&self) -> Option<TypedSource> {
        self.filter
            .as_deref()
            .filter(|expr| !expr.trim().is_empty())
            .map(|expr| TypedSource::new(self.filter_type, Value::String(expr.to_string())))
    }
}

fn default_expr_kind() -> SourceKind {
    SourceKind::Jsonata
}

fn default_src_kind() -> SourceKind {
    SourceKind::Path
}

/// One output key of a mapped record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MapField {
    pub key: String,
    #[serde(default = "default_src_kind")]
    pub src_type: SourceKind,
    #[serde(default)]
    pub src: Value,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default = "default_expr_kind")]
    pub when_type: SourceKind,
    #[serde(default)]
    pub transform: Transform,
}

impl MapField {
    /// Field copied from a row path without transformation.
    pub fn path(key: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            src_type: SourceKind::Path,
            src: Value::String(src.into()),
            when: None,
            when_type: SourceKind::Jsonata,
            transform: Transform::None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_when(mut self, kind: SourceKind, when: impl Into<String>) -> Self {
        self.when_type = kind;
        self.when = Some(when.into());
        self
    }

    pub fn source(&self) -> TypedSource {
        TypedSource::new(self.src_type, self.src.clone())
    }

    pub fn gate(&self) -> Option<TypedSource> {
        self.when
            .as_deref()
            .filter(|expr| !expr.trim().is_empty())
            .map(|expr| TypedSource::new(self.when_type, Value::String(expr.to_string())))
    }
}

/// Reduction strategy turning mapped records into the rule's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateMode {
    #[default]
    #[serde(rename = "array")]
    Array,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "objectByKey")]
    ObjectByKey,
    #[serde(rename = "first")]
    First,
    #[serde(rename = "count")]
    Count,
    /// Unrecognised modes aggregate like `array`.
    #[serde(other, rename = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    #[serde(default)]
    pub mode: AggregateMode,
    #[serde(default)]
    pub key_expr: Option<String>,
    #[serde(default = "default_expr_kind")]
    pub key_expr_type: SourceKind,
    #[serde(default)]
    pub value_expr: Option<String>,
    #[serde(default = "default_expr_kind")]
    pub value_expr_type: SourceKind,
}

impl AggregateSpec {
    pub fn mode(mode: AggregateMode) -> Self {
        Self {
            mode,
            key_expr_type: SourceKind::Jsonata,
            value_expr_type: SourceKind::Jsonata,
            ..Self::default()
        }
    }

    pub fn object_by_key(key_expr: impl Into<String>) -> Self {
        Self {
            key_expr: Some(key_expr.into()),
            ..Self::mode(AggregateMode::ObjectByKey)
        }
    }

    pub fn key_source(&self) -> Option<TypedSource> {
        self.key_expr
            .as_deref()
            .filter(|expr| !expr.trim().is_empty())
            .map(|expr| TypedSource::new(self.key_expr_type, Value::String(expr.to_string())))
    }

    pub fn value_source(&self) -> Option<TypedSource> {
        self.value_expr
            .as_deref()
            .filter(|expr| !expr.trim().is_empty())
            .map(|expr| TypedSource::new(self.value_expr_type, Value::String(expr.to_string())))
    }
}

/// Scope an aggregate result is written to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputScope {
    Flow,
    Global,
    #[default]
    #[serde(other)]
    Msg,
}

impl OutputScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputScope::Msg => "msg",
            OutputScope::Flow => "flow",
            OutputScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputSpec {
    #[serde(rename = "type", default)]
    pub scope: OutputScope,
    #[serde(default)]
    pub path: String,
}

impl OutputSpec {
    pub fn msg(path: impl Into<String>) -> Self {
        Self {
            scope: OutputScope::Msg,
            path: path.into(),
        }
    }

    /// Target path, defaulting to `extract.rule_<index>` when unset.
    pub fn resolved_path(&self, index: usize) -> FieldPath {
        if self.path.trim().is_empty() {
            FieldPath::new(format!("extract.rule_{index}"))
        } else {
            FieldPath::new(self.path.trim())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lists_jsonata_expressions_per_rule() {
        let set = RuleSet::new(vec![
            Rule {
                select: "payload.items".into(),
                filter: Some("active".into()),
                map: vec![
                    MapField::path("name", "name"),
                    MapField {
                        src_type: SourceKind::Jsonata,
                        src: json!("$uppercase(code)"),
                        ..MapField::path("code", "")
                    },
                ],
                ..Rule::new("items")
            },
            Rule {
                select_type: SelectKind::Path,
                select: "rows".into(),
                aggregate: AggregateSpec::object_by_key("id"),
                ..Rule::default()
            },
        ])
        .with_source(SourceSpec::jsonata("payload"));

        let found = set.expressions();
        let expected: Vec<(String, String)> = [
            ("source", "payload"),
            ("items", "payload.items"),
            ("items", "active"),
            ("items", "$uppercase(code)"),
            ("#1", "id"),
        ]
        .iter()
        .map(|(label, expr)| (label.to_string(), expr.to_string()))
        .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn deserializes_camel_case_rule_sets() {
        let doc = json!({
            "source": {"type": "msg", "path": "payload"},
            "naPolicy": {"enabled": true, "values": ["NA"]},
            "rules": [{
                "name": "names",
                "selectType": "path",
                "select": "items",
                "filter": "active = true",
                "map": [{"key": "name", "src": "name", "transform": "upper"}],
                "aggregate": {"mode": "objectByKey", "keyExpr": "id"},
                "output": {"type": "flow", "path": "names"},
                "onEmpty": "error",
                "onError": "stop"
            }]
        });

        let set: RuleSet = serde_json::from_value(doc).expect("rule set");
        let rule = &set.rules[0];
        assert_eq!(set.source.field_path().as_str(), "payload");
        assert_eq!(rule.select_type, SelectKind::Path);
        assert_eq!(rule.filter_type, SourceKind::Jsonata);
        assert_eq!(rule.map[0].src_type, SourceKind::Path);
        assert_eq!(rule.map[0].transform, Transform::Upper);
        assert_eq!(rule.aggregate.mode, AggregateMode::ObjectByKey);
        assert_eq!(rule.output.scope, OutputScope::Flow);
        assert_eq!(rule.on_empty, OnEmpty::Error);
        assert_eq!(rule.on_error, OnError::Stop);
    }

    #[test]
    fn unknown_discriminators_fall_back() {
        let rule: Rule = serde_json::from_value(json!({
            "selectType": "mystery",
            "aggregate": {"mode": "median"},
            "output": {"type": "disk"},
            "onEmpty": "shrug",
            "onError": "explode"
        }))
        .expect("rule");

        assert_eq!(rule.select_type, SelectKind::Root);
        assert_eq!(rule.aggregate.mode, AggregateMode::Unknown);
        assert_eq!(rule.output.scope, OutputScope::Msg);
        assert_eq!(rule.on_empty, OnEmpty::Warn);
        assert_eq!(rule.on_error, OnError::Continue);

        let field: MapField =
            serde_json::from_value(json!({"key": "k", "src": "a", "transform": "titlecase"}))
                .expect("field");
        assert_eq!(field.transform, Transform::None);
        let source: SourceSpec = serde_json::from_value(json!({"type": "s3"})).expect("source");
        assert_eq!(source.kind, RootKind::Msg);
    }

    #[test]
    fn unset_output_path_uses_rule_index() {
        assert_eq!(OutputSpec::default().resolved_path(3).as_str(), "extract.rule_3");
        assert_eq!(OutputSpec::msg(" out.names ").resolved_path(3).as_str(), "out.names");
    }

    #[test]
    fn blank_filters_are_ignored() {
        let mut rule = Rule::new("r");
        rule.filter = Some("  ".into());
        assert!(rule.filter_source().is_none());
    }
}
