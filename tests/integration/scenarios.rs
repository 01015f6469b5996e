// End-to-end extraction scenarios run through the public engine API.
use std::fs;

use serde_json::{json, Value};
use sieve::{engine, engine_from_path};
use sieve_rules::{
    AggregateMode, AggregateSpec, MapField, NaPolicy, OnEmpty, OnError, OutputSpec, Rule,
    RuleSet, RunStatus, SourceKind,
};
use test_case::test_case;

fn items_message() -> Value {
    json!({"payload": {"items": [
        {"name": "alpha", "active": true},
        {"name": "bravo", "active": false},
        {"name": "NA", "active": true}
    ]}})
}

fn rule(name: &str, select: &str, mode: AggregateMode, output: &str) -> Rule {
    Rule {
        select: select.into(),
        aggregate: AggregateSpec::mode(mode),
        output: OutputSpec::msg(output),
        ..Rule::new(name)
    }
}

#[tokio::test]
async fn active_names_exclude_na_tokens() {
    let rules = RuleSet::new(vec![Rule {
        filter: Some("active == true".into()),
        map: vec![MapField::path("name", "name")],
        ..rule("names", "payload.items", AggregateMode::Set, "out")
    }])
    .with_na_policy(NaPolicy::enabled(["", "NA", "N/A"]));
    let mut message = items_message();

    let report = engine(rules).run(&mut message).await.unwrap();
    assert_eq!(message["out"], json!(["alpha"]));
    assert_eq!(report.status, RunStatus::AllOk);
}

#[tokio::test]
async fn count_over_raw_rows() {
    let rules = RuleSet::new(vec![rule("count", "payload.items", AggregateMode::Count, "out")]);
    let mut message = items_message();

    engine(rules).run(&mut message).await.unwrap();
    assert_eq!(message["out"], json!(3));
}

#[tokio::test]
async fn pass_through_without_map_fields() {
    let rules = RuleSet::new(vec![Rule {
        filter: Some("active".into()),
        ..rule("raw", "payload.items", AggregateMode::Array, "out")
    }]);
    let mut message = items_message();

    engine(rules).run(&mut message).await.unwrap();
    assert_eq!(
        message["out"],
        json!([{"name": "alpha", "active": true}, {"name": "NA", "active": true}])
    );
}

#[tokio::test]
async fn count_equals_array_length() {
    let filter = Some("name != 'bravo'".to_string());
    let map = vec![MapField::path("n", "name")];
    let rules = RuleSet::new(vec![
        Rule {
            filter: filter.clone(),
            map: map.clone(),
            ..rule("all", "payload.items", AggregateMode::Array, "all")
        },
        Rule {
            filter,
            map,
            ..rule("count", "payload.items", AggregateMode::Count, "count")
        },
    ]);
    let mut message = items_message();

    engine(rules).run(&mut message).await.unwrap();
    let length = message["all"].as_array().map(Vec::len).unwrap();
    assert_eq!(message["count"], json!(length));
}

#[test_case(OnEmpty::Error, 1, 0 ; "error policy counts an error")]
#[test_case(OnEmpty::Warn, 0, 1 ; "warn policy counts a warning")]
#[test_case(OnEmpty::Ok, 0, 0 ; "ok policy stays silent")]
#[tokio::test]
async fn empty_select_follows_policy(policy: OnEmpty, err: usize, warn: usize) {
    let rules = RuleSet::new(vec![Rule {
        on_empty: policy,
        ..rule("empty", "payload.items", AggregateMode::Array, "out")
    }]);
    let mut message = json!({"payload": {"items": []}});

    let report = engine(rules).run(&mut message).await.unwrap();
    assert_eq!(report.summary.counts.err, err);
    assert_eq!(report.summary.counts.warn, warn);
    assert_eq!(message["out"], json!([]));
}

#[tokio::test]
async fn object_by_key_collisions_keep_last_record() {
    let rules = RuleSet::new(vec![Rule {
        map: vec![MapField::path("id", "id"), MapField::path("v", "v")],
        aggregate: AggregateSpec::object_by_key("id"),
        ..rule("by-id", "rows", AggregateMode::ObjectByKey, "out")
    }]);
    let mut message = json!({"rows": [{"id": 7, "v": "first"}, {"id": 7, "v": "second"}]});

    engine(rules).run(&mut message).await.unwrap();
    assert_eq!(message["out"], json!({"7": {"id": 7, "v": "second"}}));
}

#[tokio::test]
async fn stop_prevents_later_rules() {
    let rules = RuleSet::new(vec![
        rule("before", "rows", AggregateMode::Count, "before"),
        Rule {
            on_error: OnError::Stop,
            ..rule("broken", "scalar", AggregateMode::Array, "broken")
        },
        rule("after", "rows", AggregateMode::Count, "after"),
    ]);
    let mut message = json!({"rows": [1, 2], "scalar": "text"});

    let report = engine(rules).run(&mut message).await.unwrap();
    assert_eq!(message["before"], json!(2));
    assert!(message.get("broken").is_none());
    assert!(message.get("after").is_none());
    assert_eq!(report.summary.counts.rules, 2);
    assert_eq!(report.summary.counts.err, 1);
    assert!(!report.summary.ok);
}

#[tokio::test]
async fn continue_runs_later_rules() {
    let rules = RuleSet::new(vec![
        rule("broken", "scalar", AggregateMode::Array, "broken"),
        rule("after", "rows", AggregateMode::Count, "after"),
    ]);
    let mut message = json!({"rows": [1, 2], "scalar": "text"});

    let report = engine(rules).run(&mut message).await.unwrap();
    assert_eq!(message["after"], json!(2));
    assert_eq!(report.summary.counts.rules, 2);
    assert_eq!(report.summary.counts.ok, 1);
    assert_eq!(report.summary.counts.err, 1);
    assert_eq!(report.status, RunStatus::HasErrors);
    assert_eq!(message["sieve"]["errors"][0], json!("rule broken: select did not resolve to an array"));
}

#[tokio::test]
async fn typed_sources_and_transforms_shape_records() {
    std::env::set_var("SIEVE_SCENARIO_REGION", "eu-west");
    let rules = RuleSet::new(vec![Rule {
        map: vec![
            MapField::path("sku", "sku").with_transform(sieve_rules::Transform::Upper),
            MapField::path("qty", "qty").with_transform(sieve_rules::Transform::Number),
            MapField {
                src_type: SourceKind::Env,
                src: json!("SIEVE_SCENARIO_REGION"),
                ..MapField::path("region", "")
            },
            MapField {
                src_type: SourceKind::Msg,
                src: json!("meta.source"),
                ..MapField::path("source", "")
            },
            MapField::path("gift", "gift").with_transform(sieve_rules::Transform::Bool01),
        ],
        ..rule("orders", "order.lines", AggregateMode::First, "line")
    }]);
    let mut message = json!({
        "meta": {"source": "shop"},
        "order": {"lines": [{"sku": "ab-1", "qty": " 4 ", "gift": "yes"}]}
    });

    engine(rules).run(&mut message).await.unwrap();
    assert_eq!(
        message["line"],
        json!({"sku": "AB-1", "qty": 4, "region": "eu-west", "source": "shop", "gift": 1})
    );
}

#[tokio::test]
async fn rule_file_on_disk_drives_a_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rules.yaml");
    fs::write(
        &path,
        r#"
naPolicy:
  enabled: true
  values: ["NA"]
rules:
  - name: names
    select: payload.items
    filter: active
    map:
      - key: name
        src: name
    aggregate:
      mode: set
    output:
      type: msg
      path: names
"#,
    )?;

    let engine = engine_from_path(&path)?;
    let mut message = items_message();
    let report = engine.run(&mut message).await?;

    assert_eq!(message["names"], json!(["alpha"]));
    assert_eq!(report.status, RunStatus::AllOk);
    Ok(())
}
