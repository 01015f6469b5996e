use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use serde_json::Value;
use sieve_core::config::load_engine_config;
use sieve_core::logging::init_tracing;
use sieve_core::serde_utils::{from_json_file, from_json_str, to_pretty_json};
use sieve_rules::{
    load_rule_set, ExpressionEvaluator, MemoryStore, QueryEvaluator, RuleEngine, RunStatus,
    SnapshotSlot, Stores,
};
use tracing::debug;

mod report;

use report::{print_check, print_failure, print_report, CheckReport, ExpressionProblem};

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Declarative per-message JSON extraction", long_about = None)]
struct Cli {
    /// Log filter, e.g. `info` or `sieve_rules=debug`
    #[arg(long, global = true, env = "SIEVE_LOG")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a rule set to one message (or a JSON array of messages)
    Run(RunArgs),
    /// Load a rule set and compile every expression in it
    Check(CheckArgs),
    /// Show version information
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// Rule-set file or directory (JSON or YAML)
    #[arg(long, env = "SIEVE_RULES")]
    rules: PathBuf,
    /// Input message file, `-` for stdin
    #[arg(long, default_value = "-")]
    input: String,
    /// JSON file seeding the flow store
    #[arg(long)]
    flow: Option<PathBuf>,
    /// JSON file seeding the global store
    #[arg(long)]
    global: Option<PathBuf>,
    /// Rule set published as the active snapshot, overriding `--rules`
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Rows evaluated concurrently inside filter and map
    #[arg(long)]
    concurrency: Option<usize>,
    /// Message key the warnings and errors are attached under
    #[arg(long)]
    metadata_key: Option<String>,
    /// Print only the run reports instead of the processed messages
    #[arg(long, default_value_t = false)]
    report_only: bool,
}

#[derive(Args)]
struct CheckArgs {
    /// Rule-set file or directory (JSON or YAML)
    #[arg(long, env = "SIEVE_RULES")]
    rules: PathBuf,
    /// Emit the result as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_level.as_deref()) {
        eprintln!("failed to initialise logging: {err}");
    }

    let outcome = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check(args) => check(args),
        Commands::Version => {
            println!("sieve v{}", env!("CARGO_PKG_VERSION"));
            println!("Declarative per-message JSON extraction engine");
            Ok(ExitCode::SUCCESS)
        }
    };

    outcome.unwrap_or_else(|err| {
        eprintln!("error: {err:#}");
        ExitCode::from(2)
    })
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut config = load_engine_config().context("invalid engine configuration")?;
    if let Some(concurrency) = args.concurrency {
        config = config.with_row_concurrency(concurrency);
    }
    if let Some(key) = args.metadata_key {
        config = config.with_metadata_key(key);
    }

    let rule_set = load_rule_set(&args.rules)
        .with_context(|| format!("failed to load rules from {}", args.rules.display()))?;
    let stores = Stores::new(
        Arc::new(seed_store(args.flow.as_deref())?),
        Arc::new(seed_store(args.global.as_deref())?),
    );

    let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(QueryEvaluator::new());
    let mut engine = RuleEngine::new(rule_set, evaluator)
        .with_config(config)
        .with_stores(stores);
    if let Some(path) = &args.snapshot {
        let published = load_rule_set(path)
            .with_context(|| format!("failed to load snapshot from {}", path.display()))?;
        let slot = SnapshotSlot::new();
        let entry = slot.publish(published, Some("cli".into()));
        debug!(version = entry.version, "snapshot published");
        engine = engine.with_snapshots(slot);
    }

    let input = read_input(&args.input)?;
    let batch = input.is_array();
    let mut messages = match input {
        Value::Array(items) => items,
        single => vec![single],
    };

    let results = join_all(messages.iter_mut().map(|message| engine.run(message))).await;

    let mut worst = RunStatus::AllOk;
    let mut reports = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(report) => {
                print_report(&report);
                worst = worse(worst, report.status);
                reports.push(report);
            }
            Err(failure) => {
                print_failure(&failure);
                worst = RunStatus::Fatal;
                reports.push(failure.report);
            }
        }
    }

    let output = match (args.report_only, batch) {
        (true, true) => to_pretty_json(&reports)?,
        (true, false) => to_pretty_json(&reports[0])?,
        (false, true) => to_pretty_json(&messages)?,
        (false, false) => to_pretty_json(&messages[0])?,
    };
    println!("{output}");

    Ok(exit_code(worst))
}

fn check(args: CheckArgs) -> Result<ExitCode> {
    let rule_set = load_rule_set(&args.rules)
        .with_context(|| format!("failed to load rules from {}", args.rules.display()))?;
    let evaluator = QueryEvaluator::new();

    let expressions = rule_set.expressions();
    let problems: Vec<ExpressionProblem> = expressions
        .iter()
        .filter_map(|(rule, expr)| {
            evaluator.compile(expr).err().map(|err| ExpressionProblem {
                rule: rule.clone(),
                expression: expr.clone(),
                message: err.to_string(),
            })
        })
        .collect();

    let report = CheckReport {
        rules: rule_set.rules.len(),
        expressions: expressions.len(),
        problems,
    };
    if args.json {
        println!("{}", to_pretty_json(&report)?);
    } else {
        print_check(&args.rules, &report);
    }

    Ok(if report.problems.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn seed_store(path: Option<&Path>) -> Result<MemoryStore> {
    let Some(path) = path else {
        return Ok(MemoryStore::new());
    };
    let value: Value = from_json_file(path)
        .with_context(|| format!("failed to read store seed {}", path.display()))?;
    if !value.is_object() {
        bail!("store seed {} must be a JSON object", path.display());
    }
    Ok(MemoryStore::with_value(value))
}

fn read_input(input: &str) -> Result<Value> {
    if input == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read message from stdin")?;
        return Ok(from_json_str(&raw).context("stdin is not valid JSON")?);
    }
    Ok(from_json_file(Path::new(input))
        .with_context(|| format!("failed to read message from {input}"))?)
}

fn worse(current: RunStatus, next: RunStatus) -> RunStatus {
    let rank = |status: RunStatus| match status {
        RunStatus::AllOk => 0,
        RunStatus::HasWarnings => 1,
        RunStatus::HasErrors => 2,
        RunStatus::Fatal => 3,
    };
    if rank(next) > rank(current) {
        next
    } else {
        current
    }
}

fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::AllOk | RunStatus::HasWarnings => ExitCode::SUCCESS,
        RunStatus::HasErrors => ExitCode::from(1),
        RunStatus::Fatal => ExitCode::from(2),
    }
}
