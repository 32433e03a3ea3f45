use anyhow::{bail, Context, Result};
use bar_store::{check_day_quality, BarStore, RawBarSource};
use forecast_table::{ForecastSource, ForecastTable, ModelSpec};
use market_core::MultiDayBars;
use position_sizer::{
    pnl_from_positions, BarInput, CostModel, DecisionReason, MeanVarianceSolver, PositionSizer,
};
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::report::{DayReport, SymbolFailure, SymbolReport, UniverseReport};
use crate::sources::build_sources;
use crate::variance::VarianceProfile;

/// Day loop for one symbol: forecast sources feed a [`ForecastTable`], whose
/// blended read-out drives a [`PositionSizer`] bar by bar.
pub struct SymbolBacktest<'a> {
    config: &'a EngineConfig,
    symbol: String,
}

impl<'a> SymbolBacktest<'a> {
    pub fn new(config: &'a EngineConfig, symbol: &str) -> Self {
        Self {
            config,
            symbol: symbol.to_string(),
        }
    }

    /// Run over every day of `bars`.
    ///
    /// The first `warmup_days` only feed the table and the variance profile.
    /// After that, the position decided at the close of bar `k` is held until
    /// the close of bar `k + 1`, across the overnight gap for the last bar.
    /// Each day's PnL is priced from the day's seeded open (the previous
    /// close) through its closes, so every trade is charged exactly once.
    pub fn run(
        &self,
        bars: &MultiDayBars,
        mut sources: Vec<Box<dyn ForecastSource + Send>>,
    ) -> Result<SymbolReport> {
        let symbol = self.symbol.as_str();
        let cfg = self.config;
        let n = bars.bars_per_day;
        if bars.is_empty() {
            bail!("{symbol}: no usable days between {} and {}", cfg.start_day, cfg.end_day);
        }
        let h = cfg.horizon_length();
        if h == 0 || h > n {
            bail!("{symbol}: horizon length {h} must be in 1..={n}");
        }

        let specs = sources
            .iter()
            .map(|s| {
                let weight = cfg
                    .models
                    .iter()
                    .find(|m| m.name == s.name())
                    .map_or(1.0, |m| m.weight);
                ModelSpec::from_source(s.as_ref()).with_weight(weight)
            })
            .collect();
        let mut table = ForecastTable::new(n, specs, cfg.save_history)
            .with_context(|| format!("{symbol}: registering models"))?;

        let sizer_cfg = cfg.sizer_for(symbol);
        let costs = CostModel::from(&sizer_cfg);
        let solver = MeanVarianceSolver::new(sizer_cfg.risk_aversion);
        let sizer = PositionSizer::new(sizer_cfg, solver)
            .with_context(|| format!("{symbol}: sizer config"))?;

        let returns = bars.log_return_matrix();
        let mut quality_warnings = Vec::new();
        let mut days: Vec<DayReport> = Vec::new();
        // Decision at the last close, and the one before it.
        let mut position = 0.0;
        let mut pnl_carry = 0.0;

        for (d, day) in bars.days.iter().enumerate() {
            let quality = check_day_quality(day, cfg.max_gap_bars);
            for w in &quality.warnings {
                tracing::warn!(symbol, day = %day.day, warning = %w, "data quality");
                quality_warnings.push(format!("{}: {w}", day.day));
            }

            let sizing = d >= cfg.warmup_days;
            let mut decided = Vec::with_capacity(n);
            let mut fallbacks = 0usize;
            for (k, bar) in day.bars.iter().enumerate() {
                table
                    .update_from_sources(day.day, k, &mut sources)
                    .with_context(|| format!("{symbol} {} bar {k}: forecast update", day.day))?;
                if !sizing {
                    continue;
                }
                let forecast = table.fnx_k(k, h)?;
                let variance = table.variance_k(k, h);
                let decision = sizer
                    .step(
                        position,
                        &BarInput {
                            bar: k,
                            forecast: &forecast,
                            variance: &variance,
                            last_price: bar.close,
                        },
                    )
                    .with_context(|| format!("{symbol} {} bar {k}: sizing", day.day))?;
                if decision.reason == DecisionReason::SolverFallback {
                    fallbacks += 1;
                }
                position = decision.position;
                decided.push(position);
            }

            if sizing {
                let carry = days
                    .last()
                    .and_then(|r| r.positions.last().copied())
                    .unwrap_or(0.0);
                let mut prices = Vec::with_capacity(n + 1);
                prices.push(day.bars[0].open);
                prices.extend(day.closes());
                let mut held = Vec::with_capacity(n);
                held.push(carry);
                held.extend_from_slice(&decided[..n - 1]);

                let pnl = pnl_from_positions(&prices, &held, pnl_carry, None, &costs)
                    .with_context(|| format!("{symbol} {}: pnl", day.day))?;
                let mut prev = pnl_carry;
                let mut turnover = 0.0;
                let mut trades = 0;
                for p in &held {
                    let delta: f64 = p - prev;
                    if delta != 0.0 {
                        turnover += delta.abs();
                        trades += 1;
                    }
                    prev = *p;
                }
                pnl_carry = held[n - 1];

                tracing::debug!(
                    symbol,
                    day = %day.day,
                    net = pnl.total_net(),
                    trades,
                    end_position = position,
                    "day closed"
                );
                days.push(DayReport {
                    day: day.day,
                    gross: pnl.total_gross(),
                    cost: pnl.total_cost(),
                    net: pnl.total_net(),
                    turnover,
                    trades,
                    solver_fallbacks: fallbacks,
                    bar_pnl: pnl.net,
                    positions: decided,
                });
            }

            let profile =
                VarianceProfile::from_returns(&returns, d + 1, cfg.variance_lookback_days, cfg.variance_floor)?;
            table
                .eod(Some(profile.stdv()))
                .with_context(|| format!("{symbol} {}: end of day", day.day))?;
        }

        let mut report = SymbolReport::from_days(symbol, n, days, cfg.group_bars, cfg.periods_per_year);
        report.skipped = bars.skipped.clone();
        report.quality_warnings = quality_warnings;
        tracing::info!(
            symbol,
            days = report.days.len(),
            skipped = report.skipped.len(),
            pnl = report.total_pnl,
            sharpe = report.sharpe,
            "backtest complete"
        );
        Ok(report)
    }
}

/// Load, forecast, size and report one symbol.
pub fn run_symbol<S: RawBarSource>(config: &EngineConfig, source: S, symbol: &str) -> Result<SymbolReport> {
    config.validate()?;
    let store = BarStore::new(source, config.session.clone())?;
    let bars = store
        .get_bars(symbol, config.start_day, config.end_day, config.rolls.get(symbol))
        .with_context(|| format!("{symbol}: loading bars"))?;
    let sources = build_sources(&config.models, symbol, &bars)?;
    SymbolBacktest::new(config, symbol).run(&bars, sources)
}

/// Run every configured symbol in parallel. Symbols share nothing but the
/// read-only raw source; one failing symbol is recorded and the rest go on.
pub fn run_universe<S: RawBarSource + Sync>(config: &EngineConfig, source: &S) -> Result<UniverseReport> {
    config.validate()?;
    tracing::info!(
        symbols = config.symbols.len(),
        start = %config.start_day,
        end = %config.end_day,
        "starting universe run"
    );

    let results: Vec<(String, Result<SymbolReport>)> = config
        .symbols
        .par_iter()
        .map(|symbol| (symbol.clone(), run_symbol(config, source, symbol)))
        .collect();

    let mut out = UniverseReport::default();
    for (symbol, result) in results {
        match result {
            Ok(report) => out.reports.push(report),
            Err(e) => {
                let error = format!("{e:#}");
                tracing::error!(symbol = %symbol, error = %error, "symbol failed");
                out.failures.push(SymbolFailure { symbol, error });
            }
        }
    }
    Ok(out)
}
