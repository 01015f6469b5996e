use std::path::Path;

use colored::*;
use serde::Serialize;
use sieve_rules::{RunFailure, RunReport, RunStatus};

#[derive(Debug, Serialize)]
pub struct ExpressionProblem {
    pub rule: String,
    pub expression: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub rules: usize,
    pub expressions: usize,
    pub problems: Vec<ExpressionProblem>,
}

fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::AllOk => "✔ all ok".green().bold(),
        RunStatus::HasWarnings => "⚠ warnings".yellow().bold(),
        RunStatus::HasErrors => "✖ errors".red().bold(),
        RunStatus::Fatal => "✖ fatal".red().bold().reversed(),
    }
}

/// Operator summary of a run, written to stderr.
pub fn print_report(report: &RunReport) {
    let counts = report.summary.counts;
    eprintln!(
        "{}  run {}  rules {} (ok {}, warn {}, err {})  {} ms",
        status_label(report.status),
        report.run_id.to_string().dimmed(),
        counts.rules,
        counts.ok,
        counts.warn,
        counts.err,
        report.summary.timings.ms
    );
    for warning in &report.warnings {
        eprintln!("  {} {}", "warn".yellow(), warning);
    }
    for error in &report.errors {
        eprintln!("  {} {}", "error".red(), error);
    }
}

pub fn print_failure(failure: &RunFailure) {
    eprintln!(
        "{}  run {}  {}",
        status_label(RunStatus::Fatal),
        failure.report.run_id.to_string().dimmed(),
        failure.error
    );
}

pub fn print_check(path: &Path, report: &CheckReport) {
    if report.problems.is_empty() {
        println!(
            "{} {}: {} rules, {} expressions compiled",
            "✔".green().bold(),
            path.display(),
            report.rules,
            report.expressions
        );
        return;
    }

    println!(
        "{} {}: {} of {} expressions failed to compile",
        "✖".red().bold(),
        path.display(),
        report.problems.len(),
        report.expressions
    );
    for problem in &report.problems {
        println!("  rule {}: {}", problem.rule.bold(), problem.message);
    }
}
