//! Allend demo - runs a simulated aggregation and prints the outcome as JSON.
//!
//! ```text
//! allend-demo --ops k1=ok:10,k2=err:5,k3=ok:40 --require k2
//! allend-demo --sequential --ops ok:10,err:5 --require-all
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use parking_lot::Mutex;
use serde_json::{json, Value};

use allend_core::{
    aggregate::{Aggregation, Aggregator, InputSet, OperationKey, RequirementPolicy},
    config::Config,
    telemetry::{init_telemetry, LogFormat},
};

/// Allend - partial-failure tolerant aggregation demo
#[derive(Parser)]
#[command(
    name = "allend-demo",
    version,
    about = "Run a simulated aggregation of delayed operations",
    long_about = "Each operation is `[name=]kind:delay_ms` where kind is ok, err or panic. \
                  Prints the settled outcome and the final settlement summary as JSON."
)]
struct Cli {
    /// Operations to aggregate, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    ops: Vec<OpSpec>,

    /// Treat the operations as a list instead of a named map
    #[arg(long)]
    sequential: bool,

    /// Keys whose failure rejects the aggregation (names, or indices with --sequential)
    #[arg(long, value_delimiter = ',', conflicts_with = "require_all")]
    require: Vec<String>,

    /// Fail fast on the first failure
    #[arg(long)]
    require_all: bool,

    /// Label for logs and metrics
    #[arg(long)]
    label: Option<String>,

    /// Configuration file layered under ALLEND__* environment variables
    #[arg(long, env = "ALLEND_CONFIG")]
    config: Option<String>,

    /// Log output format
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Ok,
    Err,
    Panic,
}

/// One simulated operation.
#[derive(Debug, Clone)]
struct OpSpec {
    name: Option<String>,
    kind: OpKind,
    delay: Duration,
}

impl FromStr for OpSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, rest) = match s.split_once('=') {
            Some((name, rest)) => (Some(name.trim().to_string()), rest),
            None => (None, s),
        };

        let (kind, delay) = rest
            .split_once(':')
            .ok_or_else(|| format!("expected [name=]kind:delay_ms, got '{}'", s))?;

        let kind = match kind.trim() {
            "ok" => OpKind::Ok,
            "err" => OpKind::Err,
            "panic" => OpKind::Panic,
            other => return Err(format!("unknown operation kind '{}'", other)),
        };
        let delay_ms: u64 = delay
            .trim()
            .parse()
            .map_err(|e| format!("invalid delay '{}': {}", delay, e))?;

        Ok(Self {
            name,
            kind,
            delay: Duration::from_millis(delay_ms),
        })
    }
}

async fn simulate(label: String, kind: OpKind, delay: Duration) -> std::result::Result<Value, String> {
    tokio::time::sleep(delay).await;
    match kind {
        OpKind::Ok => Ok(json!({ "operation": label, "delay_ms": delay.as_millis() as u64 })),
        OpKind::Err => Err(format!("{} failed after {}ms", label, delay.as_millis())),
        OpKind::Panic => panic!("{} panicked after {}ms", label, delay.as_millis()),
    }
}

fn build_policy(cli: &Cli, keys: &[OperationKey]) -> Result<Option<RequirementPolicy>, clap::Error> {
    if cli.require_all {
        return Ok(Some(RequirementPolicy::AllRequired));
    }
    if cli.require.is_empty() {
        return Ok(None);
    }

    if let Some(unknown) = cli
        .require
        .iter()
        .find(|r| !keys.iter().any(|key| key.to_string() == **r))
    {
        return Err(Cli::command().error(
            ErrorKind::InvalidValue,
            format!("--require names unknown operation '{}'", unknown),
        ));
    }

    let required = |key: &OperationKey| cli.require.iter().any(|r| *r == key.to_string());
    let policy = if cli.sequential {
        RequirementPolicy::per_index(keys.iter().map(required))
    } else {
        RequirementPolicy::per_name(keys.iter().map(|key| (key.to_string(), required(key))))
    };
    Ok(Some(policy))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Could not load config: {}. Using defaults.", e);
            Config::default()
        }),
    };
    if let Some(format) = cli.log_format {
        config.telemetry.logging.format = format;
    }
    if let Some(label) = &cli.label {
        config.aggregator.label = label.clone();
    }

    init_telemetry(&config.telemetry)?;

    let operations = cli.ops.iter().enumerate().map(|(i, op)| {
        let name = op.name.clone().unwrap_or_else(|| format!("op{}", i));
        (name.clone(), simulate(name, op.kind, op.delay))
    });
    let input = if cli.sequential {
        InputSet::sequential(operations.map(|(_, op)| op))
    } else {
        InputSet::keyed(operations)?
    };

    let keys: Vec<OperationKey> = input.keys().cloned().collect();
    let aggregator = Aggregator::new(config.aggregator.clone());
    let policy = build_policy(&cli, &keys).unwrap_or_else(|e| e.exit());
    let aggregation: Aggregation<Value, String> = match policy {
        Some(policy) => aggregator.run(input, policy)?,
        None => aggregator.run_default(input)?,
    };

    let residuals = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&residuals);
    aggregation.on_residual_failure(move |failure, key| {
        tracing::warn!(key = %key, failure = %failure, "Residual failure");
        sink.lock().push(json!({ "key": key, "failure": failure }));
    })?;

    let mut monitor = aggregation.monitor();
    let outcome = aggregation.await;

    let rejected = outcome.is_err();
    let report = match outcome {
        Ok(resolution) => json!({
            "status": if resolution.is_partial() { "partial" } else { "resolved" },
            "value": resolution.value(),
            "tolerated": resolution.tolerated(),
        }),
        Err(e) => json!({
            "status": "rejected",
            "error": e.to_string(),
            "all_rejected": e.is_all_rejected(),
            "detail": e.detail(),
        }),
    };

    let summary = monitor.drained().await;
    let output = json!({
        "outcome": report,
        "summary": summary,
        "residual_failures": *residuals.lock(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if rejected {
        std::process::exit(1);
    }
    Ok(())
}
