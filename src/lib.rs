//! Sieve: declarative per-message JSON extraction.
//!
//! The workspace is split into:
//!
//! * `sieve-core`: shared errors, configuration, logging and JSON helpers
//! * `sieve-rules`: rule model, expression evaluation and the run engine
//! * `sieve-cli`: the `sieve` command-line front-end
//!
//! This crate re-exports the commonly used pieces and wires the defaults
//! together.

use std::path::Path;
use std::sync::Arc;

pub use sieve_core::{ConfigError, EngineConfig, SieveError};
pub use sieve_rules::{
    load_rule_set, parse_rule_set, ExpressionEvaluator, QueryEvaluator, Rule, RuleEngine,
    RuleError, RuleSet, RunFailure, RunReport, RunStatus, RunSummary, SnapshotSlot, Stores,
};

/// Key the run diagnostics are attached under when not configured.
pub const DEFAULT_METADATA_KEY: &str = "sieve";

/// Builds an engine over the rule set at `path`, using the built-in query
/// evaluator and configuration read from the `SIEVE_*` environment.
pub fn engine_from_path(path: impl AsRef<Path>) -> Result<RuleEngine, SieveError> {
    let config = sieve_core::config::load_engine_config()?;
    let rule_set = load_rule_set(path.as_ref())
        .map_err(|err| SieveError::ConfigError(err.to_string()))?;
    tracing::debug!(
        rules = rule_set.rules.len(),
        path = %path.as_ref().display(),
        "rule set loaded"
    );
    Ok(RuleEngine::new(rule_set, Arc::new(QueryEvaluator::new())).with_config(config))
}

/// Builds an engine over an in-memory rule set with default configuration.
pub fn engine(rule_set: RuleSet) -> RuleEngine {
    RuleEngine::new(rule_set, Arc::new(QueryEvaluator::new()))
}
