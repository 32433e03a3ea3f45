use serde::{Deserialize, Serialize};

use crate::config::SizerConfig;
use crate::solver::{PositionSolver, SolverInput};
use crate::SizingError;

/// Inputs for one bar close.
#[derive(Debug, Clone, Copy)]
pub struct BarInput<'a> {
    /// Bar-of-day index, used for window lookups.
    pub bar: usize,
    pub forecast: &'a [f64],
    /// Unscaled per-bar variance aligned with `forecast`.
    pub variance: &'a [f64],
    pub last_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    Traded,
    /// Proposed change was below `min_trade`.
    Held,
    /// Proposed position was below `min_trade` in size.
    Flattened,
    /// Clipped to `±maxpos`.
    Saturated,
    NoTrade,
    /// Solver failed or returned garbage; position kept.
    SolverFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingDecision {
    pub bar: usize,
    /// Solver output before rounding and hysteresis.
    pub proposed: Option<f64>,
    pub position: f64,
    pub reason: DecisionReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayPositions {
    pub positions: Vec<f64>,
    pub decisions: Vec<SizingDecision>,
}

/// Per-bar target position selection around a pluggable solver.
#[derive(Debug, Clone)]
pub struct PositionSizer<S: PositionSolver> {
    config: SizerConfig,
    solver: S,
}

impl<S: PositionSolver> PositionSizer<S> {
    pub fn new(config: SizerConfig, solver: S) -> Result<Self, SizingError> {
        config.validate()?;
        Ok(Self { config, solver })
    }

    pub fn config(&self) -> &SizerConfig {
        &self.config
    }

    /// `v0 · (vs + maxv · clip(|p|/maxpos, 0, 0.99)^expv)` with the scaling
    /// in force at `bar`.
    pub fn variance_vector(&self, bar: usize, v0: &[f64], current: f64) -> Vec<f64> {
        let s = self.config.scaling_at(bar);
        let load = (current.abs() / self.config.maxpos).clamp(0.0, 0.99);
        let scale = s.vs + s.maxv * load.powf(s.expv);
        v0.iter().map(|v| v * scale).collect()
    }

    /// `tscale · ln(1 + tcost/price)` for every horizon, with the farthest
    /// one shrunk to `last_cost_fraction` of the nearest.
    pub fn cost_vector(&self, bar: usize, h: usize, last_price: f64) -> Vec<f64> {
        let s = self.config.scaling_at(bar);
        let base = s.tscale * (1.0 + self.config.tcost / last_price).ln();
        let mut tc = vec![base; h];
        if h > 1 {
            tc[h - 1] = base * self.config.last_cost_fraction;
        }
        tc
    }

    fn weights(&self, h: usize) -> Result<Vec<f64>, SizingError> {
        match &self.config.horizon_weights {
            None => Ok(vec![1.0; h]),
            Some(w) if w.len() >= h => Ok(w[..h].to_vec()),
            Some(w) => Err(SizingError::ShapeMismatch {
                context: "horizon weights".to_string(),
                expected: h,
                actual: w.len(),
            }),
        }
    }

    /// Decide the position to hold after the close of `input.bar`.
    pub fn step(&self, current: f64, input: &BarInput<'_>) -> Result<SizingDecision, SizingError> {
        let bar = input.bar;
        check_finite(bar, "position", &[current])?;
        check_finite(bar, "forecast", input.forecast)?;
        check_finite(bar, "variance", input.variance)?;
        if !input.last_price.is_finite() || input.last_price <= 0.0 {
            return Err(SizingError::NonFiniteInput {
                bar,
                field: "last_price".to_string(),
            });
        }
        let h = input.forecast.len();
        if input.variance.len() != h {
            return Err(SizingError::ShapeMismatch {
                context: format!("variance at bar {bar}"),
                expected: h,
                actual: input.variance.len(),
            });
        }

        if self.config.is_no_trade(bar) {
            return Ok(SizingDecision {
                bar,
                proposed: None,
                position: 0.0,
                reason: DecisionReason::NoTrade,
            });
        }

        let variance = self.variance_vector(bar, input.variance, current);
        let cost = self.cost_vector(bar, h, input.last_price);
        let weights = self.weights(h)?;
        let solved = self.solver.solve(&SolverInput {
            current,
            forecast: input.forecast,
            variance: &variance,
            cost: &cost,
            weights: &weights,
        });

        let proposed = match solved {
            Ok(p) if p.is_finite() => p,
            Ok(p) => {
                tracing::warn!(bar, proposed = p, "solver returned non-finite target, holding");
                return Ok(self.hold(bar, current, Some(p)));
            }
            Err(e) => {
                tracing::warn!(bar, error = %e, "solver failed, holding");
                return Ok(self.hold(bar, current, None));
            }
        };

        let maxpos = self.config.maxpos;
        let min_trade = self.config.min_trade;
        // Hysteresis compares the raw proposal; rounding only shapes the trade.
        let target = if self.config.integer_lots {
            proposed.round()
        } else {
            proposed
        };

        let (position, reason) = if (proposed - current).abs() < min_trade || target == current {
            (current.clamp(-maxpos, maxpos), DecisionReason::Held)
        } else if proposed.abs() < min_trade {
            (0.0, DecisionReason::Flattened)
        } else if target.abs() > maxpos {
            (maxpos.copysign(target), DecisionReason::Saturated)
        } else {
            (target, DecisionReason::Traded)
        };

        Ok(SizingDecision {
            bar,
            proposed: Some(proposed),
            position,
            reason,
        })
    }

    /// Run [`Self::step`] over one day's bars starting from `carry_in`.
    pub fn size_day(&self, carry_in: f64, inputs: &[BarInput<'_>]) -> Result<DayPositions, SizingError> {
        let mut out = DayPositions {
            positions: Vec::with_capacity(inputs.len()),
            decisions: Vec::with_capacity(inputs.len()),
        };
        let mut current = carry_in;
        for input in inputs {
            let decision = self.step(current, input)?;
            current = decision.position;
            out.positions.push(current);
            out.decisions.push(decision);
        }
        Ok(out)
    }

    fn hold(&self, bar: usize, current: f64, proposed: Option<f64>) -> SizingDecision {
        let maxpos = self.config.maxpos;
        SizingDecision {
            bar,
            proposed,
            position: current.clamp(-maxpos, maxpos),
            reason: DecisionReason::SolverFallback,
        }
    }
}

fn check_finite(bar: usize, field: &str, values: &[f64]) -> Result<(), SizingError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SizingError::NonFiniteInput {
            bar,
            field: field.to_string(),
        });
    }
    Ok(())
}
