//! Declarative per-message JSON extraction engine.
//!
//! A [`RuleSet`] lists rules that each select an array from the message,
//! filter its rows, map every row into a record, aggregate the records and
//! write the result to an output location. [`RuleEngine::run`] applies a
//! rule set to one message and returns a [`RunReport`] with counts, timings,
//! warnings and errors.
//!
//! Expressions are delegated to an [`ExpressionEvaluator`]; [`QueryEvaluator`]
//! is the built-in implementation.

mod aggregate;
mod engine;
mod error;
mod expression;
mod loader;
mod na;
mod outcome;
mod path;
mod pipeline;
mod query;
mod rule;
mod source;
mod store;
mod transform;
mod value;

pub use aggregate::is_empty as is_empty_result;
pub use engine::RuleEngine;
pub use error::{Result, RuleError};
pub use expression::{CompiledExpr, ExpressionEvaluator, Expressions, DOCUMENT_BINDING};
pub use loader::{load_rule_set, parse_rule_set};
pub use na::{NaNormalizer, NaPolicy};
pub use outcome::{
    RuleOutcome, RuleStatus, RunContext, RunCounts, RunFailure, RunReport, RunStatus, RunSummary,
    RunTimings,
};
pub use path::{FieldPath, Segment};
pub use query::QueryEvaluator;
pub use rule::{
    AggregateMode, AggregateSpec, MapField, OnEmpty, OnError, OutputScope, OutputSpec, RootKind,
    Rule, RuleSet, SelectKind, SourceSpec,
};
pub use source::{Resolver, SourceKind, TypedSource};
pub use store::{
    ContextStore, MemoryStore, SnapshotEntry, SnapshotSlot, Stores, DEFAULT_HISTORY_LIMIT,
};
pub use transform::Transform;
