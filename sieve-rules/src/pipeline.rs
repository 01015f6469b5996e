use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::aggregate::{aggregate, is_empty, AggregateScope};
use crate::error::{Result, RuleError};
use crate::expression::Expressions;
use crate::na::NaNormalizer;
use crate::outcome::{RuleOutcome, RuleStatus, RunContext};
use crate::path::FieldPath;
use crate::rule::{MapField, OnEmpty, OnError, OutputScope, Rule, SelectKind};
use crate::source::{Resolver, TypedSource};
use crate::store::Stores;
use crate::value::is_truthy;

/// Executes single rules against a message.
///
/// Row-level filter and map evaluation runs up to `row_concurrency` rows at
/// a time; results and warnings always come back in row order.
pub struct Pipeline<'a> {
    pub stores: &'a Stores,
    pub expressions: &'a Expressions,
    pub na: &'a NaNormalizer,
    pub row_concurrency: usize,
}

struct Produced {
    result: Value,
    warnings: Vec<String>,
}

impl Pipeline<'_> {
    /// Runs select → filter → map → aggregate → output for one rule and
    /// records its diagnostics on `ctx`. Counting is left to the caller.
    pub async fn run_rule(
        &self,
        rule: &Rule,
        index: usize,
        root: &Value,
        message: &mut Value,
        ctx: &mut RunContext,
    ) -> RuleOutcome {
        let label = rule.label(index);
        let halt_on_error = rule.on_error == OnError::Stop;

        let produced = {
            let current: &Value = message;
            let resolver = Resolver::new(current, self.stores, self.expressions);
            self.produce(rule, &label, root, current, &resolver).await
        };

        let Produced { result, warnings } = match produced {
            Ok(produced) => produced,
            Err(err) => {
                warn!(rule = %label, error = %err, "rule failed");
                ctx.error(format!("rule {label}: {err}"));
                return RuleOutcome {
                    label,
                    status: RuleStatus::Err,
                    empty: true,
                    halt: halt_on_error,
                };
            }
        };

        let mut status = if warnings.is_empty() {
            RuleStatus::Ok
        } else {
            RuleStatus::Warn
        };
        ctx.extend_warnings(warnings);

        let empty = is_empty(rule.aggregate.mode, &result);
        if let Err(err) = self.write_output(rule, index, message, result) {
            warn!(rule = %label, error = %err, "rule output rejected");
            ctx.error(format!("rule {label}: {err}"));
            return RuleOutcome {
                label,
                status: RuleStatus::Err,
                empty,
                halt: halt_on_error,
            };
        }

        if empty {
            match rule.on_empty {
                OnEmpty::Ok => {}
                OnEmpty::Warn => {
                    ctx.warn(format!("rule {label}: empty result"));
                    status = RuleStatus::Warn;
                }
                OnEmpty::Error => {
                    ctx.error(format!("rule {label}: empty result"));
                    status = RuleStatus::Err;
                }
            }
        }

        debug!(rule = %label, ?status, empty, "rule finished");
        RuleOutcome {
            label,
            status,
            empty,
            halt: false,
        }
    }

    async fn produce(
        &self,
        rule: &Rule,
        label: &str,
        root: &Value,
        message: &Value,
        resolver: &Resolver<'_>,
    ) -> Result<Produced> {
        let rows = self.select(rule, root, resolver).await?;
        let selected = rows.len();
        let mut warnings = Vec::new();

        let rows = self
            .filter(rule, label, rows, message, resolver, &mut warnings)
            .await;
        debug!(rule = %label, selected, kept = rows.len(), "rows selected");

        let records = self
            .map(rule, label, rows, message, resolver, &mut warnings)
            .await;

        let scope = AggregateScope {
            resolver,
            document: message,
            na: self.na,
            label,
        };
        let result = aggregate(&rule.aggregate, records, &scope, &mut warnings).await;
        Ok(Produced { result, warnings })
    }

    async fn select(
        &self,
        rule: &Rule,
        root: &Value,
        resolver: &Resolver<'_>,
    ) -> Result<Vec<Value>> {
        let select = rule.select.trim();
        let selected = if select.is_empty() {
            root.clone()
        } else {
            match rule.select_type {
                SelectKind::Jsonata => {
                    resolver
                        .evaluate(&TypedSource::jsonata(select), root, None)
                        .await?
                }
                SelectKind::Path => FieldPath::new(select).lookup(root),
                SelectKind::Root => root.clone(),
            }
        };

        match selected {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            _ => Err(RuleError::SelectNotArray),
        }
    }

    async fn filter(
        &self,
        rule: &Rule,
        label: &str,
        rows: Vec<Value>,
        message: &Value,
        resolver: &Resolver<'_>,
        warnings: &mut Vec<String>,
    ) -> Vec<Value> {
        let Some(gate) = rule.filter_source() else {
            return rows;
        };

        let verdicts: Vec<Result<Value>> = stream::iter(
            rows.iter()
                .map(|row| resolver.evaluate(&gate, message, Some(row))),
        )
        .buffered(self.row_concurrency.max(1))
        .collect()
        .await;

        let mut kept = Vec::with_capacity(rows.len());
        for (position, (row, verdict)) in rows.into_iter().zip(verdicts).enumerate() {
            match verdict {
                Ok(value) if is_truthy(&value) => kept.push(row),
                Ok(_) => {}
                Err(err) => warnings.push(format!(
                    "rule {label}: row {position} dropped, filter failed: {err}"
                )),
            }
        }
        kept
    }

    async fn map(
        &self,
        rule: &Rule,
        label: &str,
        rows: Vec<Value>,
        message: &Value,
        resolver: &Resolver<'_>,
        warnings: &mut Vec<String>,
    ) -> Vec<Value> {
        if rule.map.is_empty() {
            return rows;
        }

        let mapped: Vec<(Value, Vec<String>)> = stream::iter(rows.iter().enumerate().map(
            |(position, row)| self.map_row(&rule.map, label, position, row, message, resolver),
        ))
        .buffered(self.row_concurrency.max(1))
        .collect()
        .await;

        let mut records = Vec::with_capacity(mapped.len());
        for (record, row_warnings) in mapped {
            warnings.extend(row_warnings);
            records.push(record);
        }
        records
    }

    /// Builds one record. Field failures omit the field; the row is always
    /// emitted.
    async fn map_row(
        &self,
        fields: &[MapField],
        label: &str,
        position: usize,
        row: &Value,
        message: &Value,
        resolver: &Resolver<'_>,
    ) -> (Value, Vec<String>) {
        let mut record = Map::new();
        let mut warnings = Vec::new();

        for field in fields {
            if let Some(gate) = field.gate() {
                match resolver.evaluate(&gate, message, Some(row)).await {
                    Ok(open) if is_truthy(&open) => {}
                    Ok(_) => continue,
                    Err(err) => {
                        debug!(rule = %label, field = %field.key, error = %err, "when gate failed, field skipped");
                        continue;
                    }
                }
            }

            match resolver.evaluate(&field.source(), message, Some(row)).await {
                Ok(value) => {
                    let value = field.transform.apply(self.na.normalize(value));
                    record.insert(field.key.clone(), value);
                }
                Err(err) => warnings.push(format!(
                    "rule {label}: row {position} field {:?} omitted: {err}",
                    field.key
                )),
            }
        }

        (Value::Object(record), warnings)
    }

    fn write_output(
        &self,
        rule: &Rule,
        index: usize,
        message: &mut Value,
        result: Value,
    ) -> Result<()> {
        let path = rule.output.resolved_path(index);
        let written = match rule.output.scope {
            OutputScope::Msg => path.assign(message, result),
            OutputScope::Flow => self.stores.flow.set(&path, result),
            OutputScope::Global => self.stores.global.set(&path, result),
        };
        written.map_err(|message| RuleError::Output {
            scope: rule.output.scope.as_str(),
            path: path.as_str().to_string(),
            message,
        })
    }
}
