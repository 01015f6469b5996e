// The engine against a deterministic stub evaluator.
use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::eq;
use serde_json::{json, Value};
use sieve_core::EngineConfig;
use sieve_rules::{
    AggregateMode, AggregateSpec, CompiledExpr, ExpressionEvaluator, OutputSpec, Rule, RuleEngine,
    RuleError, RuleSet, RunStatus, SourceSpec,
};

mock! {
    pub Evaluator {}

    #[async_trait]
    impl ExpressionEvaluator for Evaluator {
        fn compile(&self, expr: &str) -> sieve_rules::Result<CompiledExpr>;
        async fn evaluate(
            &self,
            compiled: &CompiledExpr,
            context: &Value,
            document: &Value,
        ) -> sieve_rules::Result<Value>;
    }
}

fn counting_rule(filter: &str) -> Rule {
    Rule {
        select: "rows".into(),
        filter: Some(filter.into()),
        aggregate: AggregateSpec::mode(AggregateMode::Count),
        output: OutputSpec::msg("kept"),
        ..Rule::new("stubbed")
    }
}

#[tokio::test]
async fn select_and_filter_delegate_to_the_evaluator() {
    let mut evaluator = MockEvaluator::new();
    evaluator
        .expect_compile()
        .returning(|expr| Ok(CompiledExpr::new(expr, expr.to_string())));
    evaluator
        .expect_evaluate()
        .returning(|compiled, context, _| match compiled.source() {
            "rows" => Ok(context["rows"].clone()),
            "even" => Ok(json!(context["n"].as_i64().unwrap_or(1) % 2 == 0)),
            other => Err(RuleError::evaluation(format!("unexpected {other}"))),
        });

    let engine = RuleEngine::new(RuleSet::new(vec![counting_rule("even")]), Arc::new(evaluator));
    let mut message = json!({"rows": [{"n": 1}, {"n": 2}, {"n": 4}]});

    let report = engine.run(&mut message).await.unwrap();
    assert_eq!(message["kept"], json!(2));
    assert_eq!(report.status, RunStatus::AllOk);
}

#[tokio::test]
async fn rows_reach_the_evaluator_unmerged_with_the_message() {
    let mut evaluator = MockEvaluator::new();
    evaluator
        .expect_compile()
        .returning(|expr| Ok(CompiledExpr::new(expr, ())));
    evaluator
        .expect_evaluate()
        .returning(|compiled, context, document| match compiled.source() {
            "rows" => Ok(context["rows"].clone()),
            _ => {
                assert!(context.get("$msg").is_none());
                assert_eq!(document["tenant"], json!("acme"));
                Ok(json!(context["n"].as_i64() > Some(1)))
            }
        });

    let engine = RuleEngine::new(RuleSet::new(vec![counting_rule("gate")]), Arc::new(evaluator));
    let mut message = json!({"tenant": "acme", "rows": [{"n": 1}, {"n": 2}, {"n": 3}]});

    engine.run(&mut message).await.unwrap();
    assert_eq!(message["kept"], json!(2));
}

#[tokio::test]
async fn compiled_programs_are_reused_across_rows_and_runs() {
    let mut evaluator = MockEvaluator::new();
    evaluator
        .expect_compile()
        .with(eq("rows"))
        .times(1)
        .returning(|expr| Ok(CompiledExpr::new(expr, ())));
    evaluator
        .expect_compile()
        .with(eq("keep"))
        .times(1)
        .returning(|expr| Ok(CompiledExpr::new(expr, ())));
    evaluator
        .expect_evaluate()
        .returning(|compiled, context, _| match compiled.source() {
            "rows" => Ok(context["rows"].clone()),
            _ => Ok(json!(true)),
        });

    let engine = RuleEngine::new(RuleSet::new(vec![counting_rule("keep")]), Arc::new(evaluator));
    for _ in 0..3 {
        let mut message = json!({"rows": [1, 2, 3]});
        engine.run(&mut message).await.unwrap();
        assert_eq!(message["kept"], json!(3));
    }
}

#[tokio::test]
async fn disabling_the_cache_compiles_every_time() {
    let mut evaluator = MockEvaluator::new();
    evaluator
        .expect_compile()
        .times(2)
        .returning(|expr| Ok(CompiledExpr::new(expr, ())));
    evaluator
        .expect_evaluate()
        .returning(|_, context, _| Ok(context["rows"].clone()));

    let rule = Rule {
        filter: None,
        ..counting_rule("unused")
    };
    let config = EngineConfig {
        cache_expressions: false,
        ..EngineConfig::default()
    };
    let engine = RuleEngine::new(RuleSet::new(vec![rule]), Arc::new(evaluator)).with_config(config);
    for _ in 0..2 {
        let mut message = json!({"rows": []});
        engine.run(&mut message).await.unwrap();
    }
}

#[tokio::test]
async fn evaluator_failure_in_filter_is_a_warning_per_row() {
    let mut evaluator = MockEvaluator::new();
    evaluator
        .expect_compile()
        .returning(|expr| Ok(CompiledExpr::new(expr, ())));
    evaluator
        .expect_evaluate()
        .returning(|compiled, context, _| match compiled.source() {
            "rows" => Ok(context["rows"].clone()),
            _ if context["bad"] == json!(true) => Err(RuleError::evaluation("boom")),
            _ => Ok(json!(true)),
        });

    let engine = RuleEngine::new(RuleSet::new(vec![counting_rule("gate")]), Arc::new(evaluator));
    let mut message = json!({"rows": [{"bad": false}, {"bad": true}, {"bad": true}]});

    let report = engine.run(&mut message).await.unwrap();
    assert_eq!(message["kept"], json!(1));
    assert_eq!(report.status, RunStatus::HasWarnings);
    assert_eq!(report.summary.counts.warn, 1);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings[0].contains("row 1"));
    assert!(report.warnings[1].contains("row 2"));
}

#[tokio::test]
async fn root_expression_failure_aborts_the_run() {
    let mut evaluator = MockEvaluator::new();
    evaluator
        .expect_compile()
        .returning(|expr| Ok(CompiledExpr::new(expr, ())));
    evaluator
        .expect_evaluate()
        .returning(|_, _, _| Err(RuleError::evaluation("root unavailable")));

    let rules = RuleSet::new(vec![counting_rule("keep")]).with_source(SourceSpec::jsonata("$.body"));
    let engine = RuleEngine::new(rules, Arc::new(evaluator));
    let mut message = json!({"rows": [1]});

    let failure = engine.run(&mut message).await.unwrap_err();
    assert_eq!(failure.report.status, RunStatus::Fatal);
    assert!(failure.to_string().contains("root unavailable"));
    assert_eq!(message["sieve"]["errors"].as_array().map(Vec::len), Some(1));
    assert!(message.get("kept").is_none());
}
