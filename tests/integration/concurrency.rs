// Concurrent runs and snapshot consistency.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use sieve_core::EngineConfig;
use sieve_rules::{
    AggregateMode, AggregateSpec, CompiledExpr, ExpressionEvaluator, MapField, OutputSpec,
    QueryEvaluator, Rule, RuleEngine, RuleSet, SnapshotSlot,
};

fn count_rule(name: &str, output: &str) -> Rule {
    Rule {
        select: "rows".into(),
        aggregate: AggregateSpec::mode(AggregateMode::Count),
        output: OutputSpec::msg(output),
        ..Rule::new(name)
    }
}

/// Publishes a replacement rule set the first time any expression runs,
/// standing in for a configuration reload racing a run.
struct ReloadingEvaluator {
    inner: QueryEvaluator,
    slot: SnapshotSlot,
    replacement: Mutex<Option<RuleSet>>,
}

#[async_trait]
impl ExpressionEvaluator for ReloadingEvaluator {
    fn compile(&self, expr: &str) -> sieve_rules::Result<CompiledExpr> {
        self.inner.compile(expr)
    }

    async fn evaluate(
        &self,
        compiled: &CompiledExpr,
        context: &Value,
        document: &Value,
    ) -> sieve_rules::Result<Value> {
        let next = self.replacement.lock().unwrap().take();
        if let Some(next) = next {
            self.slot.publish(next, Some("reload".into()));
        }
        self.inner.evaluate(compiled, context, document).await
    }
}

#[tokio::test]
async fn independent_runs_on_one_engine() {
    let rules = RuleSet::new(vec![Rule {
        filter: Some("keep".into()),
        map: vec![MapField::path("n", "n")],
        ..count_rule("kept", "kept")
    }]);
    let engine = sieve::engine(rules).with_config(EngineConfig::default().with_row_concurrency(4));

    let mut messages: Vec<Value> = (0..16)
        .map(|size| {
            let rows: Vec<Value> = (0..size).map(|n| json!({"n": n, "keep": n % 2 == 0})).collect();
            json!({"rows": rows})
        })
        .collect();

    let results = join_all(messages.iter_mut().map(|message| engine.run(message))).await;

    let mut run_ids = HashSet::new();
    for (size, result) in results.into_iter().enumerate() {
        let report = result.unwrap();
        assert!(run_ids.insert(report.run_id));
        assert_eq!(messages[size]["kept"], json!((size + 1) / 2));
    }
}

#[tokio::test]
async fn run_completes_against_the_snapshot_it_started_with() {
    let slot = SnapshotSlot::new();
    slot.publish(
        RuleSet::new(vec![count_rule("first", "a"), count_rule("second", "b")]),
        None,
    );
    let evaluator = ReloadingEvaluator {
        inner: QueryEvaluator::new(),
        slot: slot.clone(),
        replacement: Mutex::new(Some(RuleSet::new(vec![count_rule("replacement", "z")]))),
    };
    let engine = RuleEngine::new(RuleSet::default(), Arc::new(evaluator)).with_snapshots(slot.clone());

    let mut during = json!({"rows": [1, 2]});
    let report = engine.run(&mut during).await.unwrap();
    assert_eq!(report.summary.counts.rules, 2);
    assert_eq!(during["a"], json!(2));
    assert_eq!(during["b"], json!(2));
    assert!(during.get("z").is_none());
    assert_eq!(slot.history().len(), 2);

    let mut after = json!({"rows": [1]});
    engine.run(&mut after).await.unwrap();
    assert_eq!(after["z"], json!(1));
    assert!(after.get("a").is_none());
}
