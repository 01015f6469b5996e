use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::error::RuleError;

/// Terminal state of one rule within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Ok,
    Warn,
    Err,
}

/// What a single rule contributed to the run.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub label: String,
    pub status: RuleStatus,
    /// Whether the aggregate result was empty for its mode.
    pub empty: bool,
    /// Whether the rule asked the run to skip the remaining rules.
    pub halt: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub rules: usize,
    pub ok: usize,
    pub warn: usize,
    pub err: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTimings {
    pub ms: u64,
}

/// Summary delivered as the processed message's `payload`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ok: bool,
    pub counts: RunCounts,
    pub timings: RunTimings,
}

/// Operator-facing classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    AllOk,
    HasWarnings,
    HasErrors,
    Fatal,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::AllOk => "all-ok",
            RunStatus::HasWarnings => "has-warnings",
            RunStatus::HasErrors => "has-errors",
            RunStatus::Fatal => "fatal",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-run state threaded through every stage.
///
/// Warnings and errors are append-only for the lifetime of the run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    warnings: Vec<String>,
    errors: Vec<String>,
    counts: RunCounts,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn extend_warnings(&mut self, warnings: impl IntoIterator<Item = String>) {
        self.warnings.extend(warnings);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn counts(&self) -> RunCounts {
        self.counts
    }

    pub fn record(&mut self, outcome: &RuleOutcome) {
        self.counts.rules += 1;
        match outcome.status {
            RuleStatus::Ok => self.counts.ok += 1,
            RuleStatus::Warn => self.counts.warn += 1,
            RuleStatus::Err => self.counts.err += 1,
        }
    }

    /// Closes the run. `fatal` marks an engine failure.
    pub fn finish(self, run_id: Uuid, elapsed_ms: u64, fatal: bool) -> RunReport {
        let status = if fatal {
            RunStatus::Fatal
        } else if self.counts.err > 0 || !self.errors.is_empty() {
            RunStatus::HasErrors
        } else if self.counts.warn > 0 || !self.warnings.is_empty() {
            RunStatus::HasWarnings
        } else {
            RunStatus::AllOk
        };

        RunReport {
            run_id,
            status,
            summary: RunSummary {
                ok: !fatal && self.counts.err == 0,
                counts: self.counts,
                timings: RunTimings { ms: elapsed_ms },
            },
            warnings: self.warnings,
            errors: self.errors,
        }
    }
}

/// Everything a run produced besides the output writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl RunReport {
    /// Writes the summary to `payload` and the diagnostics under
    /// `metadata_key`. Returns `false` when the message is not an object.
    pub fn attach(&self, message: &mut Value, metadata_key: &str) -> bool {
        let Value::Object(fields) = message else {
            return false;
        };
        fields.insert("payload".into(), json!(self.summary));
        fields.insert(
            metadata_key.to_string(),
            json!({
                "runId": self.run_id,
                "status": self.status,
                "warnings": self.warnings,
                "errors": self.errors,
            }),
        );
        true
    }
}

/// An engine failure: the run aborted outside any rule boundary.
#[derive(Debug, Error)]
#[error("run {} aborted: {error}", report.run_id)]
pub struct RunFailure {
    #[source]
    pub error: RuleError,
    /// Diagnostics accumulated before the failure, with status `fatal`.
    pub report: RunReport,
}
