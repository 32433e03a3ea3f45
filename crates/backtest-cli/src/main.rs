//! backtest-cli: run the AR1 intraday backtest over a JSON bar archive.
//!
//! Reads an engine config (JSON), applies `AR1_*` overrides from the
//! environment or `.env`, runs every symbol and prints the report as JSON.
//!
//! Usage:
//!   cargo run -p backtest-cli -- --config ar1.json --data /data/bars
//!   cargo run -p backtest-cli -- --config ar1.json --data /data/bars --out report.json
//!   AR1_SYMBOLS=ES,NQ cargo run -p backtest-cli -- --config ar1.json --data /data/bars --json-logs

use std::path::PathBuf;

use anyhow::{bail, Context};
use backtest_engine::{run_universe, EngineConfig};
use bar_store::JsonDirSource;

const DEFAULT_FILTER: &str = "backtest_cli=info,backtest_engine=info,bar_store=warn";

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    if args.iter().any(|a| a == "--json-logs") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let Some(config_path) = arg_value(&args, "--config").map(PathBuf::from) else {
        bail!("usage: backtest-cli --config <file> --data <dir> [--out <file>] [--json-logs]");
    };
    let data_dir = arg_value(&args, "--data")
        .or_else(|| std::env::var("AR1_DATA_DIR").ok())
        .map(PathBuf::from)
        .context("--data <dir> or AR1_DATA_DIR is required")?;

    let mut config = EngineConfig::from_json_file(&config_path)?;
    config.apply_env_overrides()?;
    config.validate()?;
    tracing::info!(
        config = %config_path.display(),
        data = %data_dir.display(),
        symbols = ?config.symbols,
        "configuration loaded"
    );

    let source = JsonDirSource::new(data_dir);
    let report = run_universe(&config, &source)?;

    for failure in &report.failures {
        tracing::warn!(symbol = %failure.symbol, error = %failure.error, "symbol not reported");
    }
    for r in &report.reports {
        tracing::info!(
            symbol = %r.symbol,
            days = r.days.len(),
            pnl = r.total_pnl,
            sharpe = r.sharpe,
            max_drawdown = r.max_drawdown,
            "symbol summary"
        );
    }

    let json = serde_json::to_string_pretty(&report)?;
    match arg_value(&args, "--out") {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing report {path}"))?;
            tracing::info!(path = %path, "report written");
        }
        None => println!("{json}"),
    }

    if report.reports.is_empty() {
        bail!("no symbol produced a report");
    }
    Ok(())
}
