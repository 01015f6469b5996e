use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use sieve_core::EngineConfig;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{Result, RuleError};
use crate::expression::{ExpressionEvaluator, Expressions};
use crate::loader::load_rule_set;
use crate::outcome::{RunContext, RunFailure, RunReport};
use crate::path::FieldPath;
use crate::pipeline::Pipeline;
use crate::rule::{RootKind, RuleSet, SourceSpec};
use crate::store::{SnapshotSlot, Stores};

/// Runtime executor that applies a rule set to one message per run.
pub struct RuleEngine {
    local: Arc<RuleSet>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    expressions: Expressions,
    stores: Stores,
    snapshots: Option<SnapshotSlot>,
    config: EngineConfig,
}

impl RuleEngine {
    /// Engine over a local rule set with default configuration.
    pub fn new(rule_set: RuleSet, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        let config = EngineConfig::default();
        Self {
            local: Arc::new(rule_set),
            expressions: Expressions::new(evaluator.clone(), config.cache_expressions),
            evaluator,
            stores: Stores::default(),
            snapshots: None,
            config,
        }
    }

    /// Loads the local rule set from a JSON or YAML file.
    pub fn from_path(
        path: impl AsRef<Path>,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Result<Self> {
        let rule_set = load_rule_set(path)?;
        Ok(Self::new(rule_set, evaluator))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.expressions = Expressions::new(self.evaluator.clone(), config.cache_expressions);
        self.config = config;
        self
    }

    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = stores;
        self
    }

    /// Prefer the rule set published in `slot` over the local one.
    pub fn with_snapshots(mut self, slot: SnapshotSlot) -> Self {
        self.snapshots = Some(slot);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The rule set a run starting now would use.
    pub fn active_rule_set(&self) -> Arc<RuleSet> {
        self.snapshots
            .as_ref()
            .and_then(SnapshotSlot::current)
            .unwrap_or_else(|| self.local.clone())
    }

    /// Applies every rule to `message`, writing outputs, the summary
    /// (`payload`) and the diagnostics (under the configured metadata key).
    ///
    /// Rule failures are reported in the returned [`RunReport`]; only a
    /// failure to resolve the message root aborts the run.
    pub async fn run(&self, message: &mut Value) -> std::result::Result<RunReport, RunFailure> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.execute(run_id, message).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        message: &mut Value,
    ) -> std::result::Result<RunReport, RunFailure> {
        let started = Instant::now();
        let rule_set = self.active_rule_set();
        let mut ctx = RunContext::new();
        debug!(rules = rule_set.rules.len(), "run started");

        let root = match Root::resolve(&rule_set.source, message, &self.expressions).await {
            Ok(root) => root,
            Err(err) => {
                error!(error = %err, "run aborted");
                ctx.error(format!("engine: {err}"));
                let report = ctx.finish(run_id, elapsed_ms(started), true);
                self.attach(&report, message);
                return Err(RunFailure { error: err, report });
            }
        };

        let na = rule_set.na_policy.normalizer();
        let pipeline = Pipeline {
            stores: &self.stores,
            expressions: &self.expressions,
            na: &na,
            row_concurrency: self.config.row_concurrency,
        };

        for (index, rule) in rule_set.rules.iter().enumerate() {
            let document = root.current(message, &self.stores);
            let outcome = pipeline
                .run_rule(rule, index, &document, message, &mut ctx)
                .await;
            ctx.record(&outcome);
            if outcome.halt {
                warn!(rule = %outcome.label, skipped = rule_set.rules.len() - index - 1, "rule failed with onError=stop");
                break;
            }
        }

        let report = ctx.finish(run_id, elapsed_ms(started), false);
        self.attach(&report, message);
        info!(
            status = %report.status,
            rules = report.summary.counts.rules,
            warn = report.summary.counts.warn,
            err = report.summary.counts.err,
            ms = report.summary.timings.ms,
            "run finished"
        );
        Ok(report)
    }

    fn attach(&self, report: &RunReport, message: &mut Value) {
        if !report.attach(message, &self.config.metadata_key) {
            warn!("message is not a JSON object, run report not attached");
        }
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.local.rules.len())
            .field("snapshots", &self.snapshots)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Logical root a run's rules select from.
///
/// Store-backed roots are re-read before every rule so a rule sees the
/// writes of the rules before it.
enum Root {
    Message(FieldPath),
    Flow(FieldPath),
    Global(FieldPath),
    Computed(Value),
}

impl Root {
    async fn resolve(spec: &SourceSpec, message: &Value, expressions: &Expressions) -> Result<Root> {
        let path = spec.field_path();
        match spec.kind {
            RootKind::Msg | RootKind::Path => {
                checked(&path)?;
                Ok(Root::Message(path))
            }
            RootKind::Flow => {
                checked(&path)?;
                Ok(Root::Flow(path))
            }
            RootKind::Global => {
                checked(&path)?;
                Ok(Root::Global(path))
            }
            RootKind::Jsonata => {
                let expr = spec.expression();
                if expr.trim().is_empty() {
                    return Ok(Root::Message(FieldPath::default()));
                }
                let value = expressions
                    .evaluate(expr, message, message)
                    .await
                    .map_err(|err| RuleError::Root(err.to_string()))?;
                Ok(Root::Computed(value))
            }
        }
    }

    fn current(&self, message: &Value, stores: &Stores) -> Value {
        match self {
            Root::Message(path) => path.lookup(message),
            Root::Flow(path) => stores.flow.get(path),
            Root::Global(path) => stores.global.get(path),
            Root::Computed(value) => value.clone(),
        }
    }
}

fn checked(path: &FieldPath) -> Result<()> {
    path.segments()
        .map(|_| ())
        .map_err(|reason| RuleError::Root(format!("invalid path {:?}: {reason}", path.as_str())))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
