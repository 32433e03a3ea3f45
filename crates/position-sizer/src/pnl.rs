use serde::{Deserialize, Serialize};

use crate::{SizerConfig, SizingError};

/// Execution costs charged on every position change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Per-lot cost in price units.
    pub tcost: f64,
    /// Fixed charge per non-zero trade.
    pub fee: f64,
    pub contract_size: f64,
}

impl From<&SizerConfig> for CostModel {
    fn from(cfg: &SizerConfig) -> Self {
        Self {
            tcost: cfg.tcost,
            fee: cfg.fee,
            contract_size: cfg.contract_size,
        }
    }
}

impl CostModel {
    pub fn trade_cost(&self, delta: f64) -> f64 {
        if delta == 0.0 {
            return 0.0;
        }
        delta.abs() * self.tcost * self.contract_size + self.fee
    }
}

/// Per-bar gross, cost and net PnL. `net[t] == gross[t] - cost[t]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlSeries {
    pub gross: Vec<f64>,
    pub cost: Vec<f64>,
    pub net: Vec<f64>,
}

impl PnlSeries {
    pub fn len(&self) -> usize {
        self.net.len()
    }

    pub fn is_empty(&self) -> bool {
        self.net.is_empty()
    }

    pub fn total_gross(&self) -> f64 {
        self.gross.iter().sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.cost.iter().sum()
    }

    pub fn total_net(&self) -> f64 {
        self.net.iter().sum()
    }

    pub fn cumulative_net(&self) -> Vec<f64> {
        self.net
            .iter()
            .scan(0.0, |acc, x| {
                *acc += x;
                Some(*acc)
            })
            .collect()
    }

    pub fn extend(&mut self, other: PnlSeries) {
        self.gross.extend(other.gross);
        self.cost.extend(other.cost);
        self.net.extend(other.net);
    }
}

/// PnL of holding `positions[t]` from `prices[t]` to `prices[t+1]`.
///
/// `prices` has one more entry than `positions`. The trade into
/// `positions[t]` (from `positions[t-1]`, or `carry_in` for `t = 0`) is
/// charged on bar `t`. When `lr0` is given, the carried-in position also
/// earns the overnight gap `carry_in · prices[0] · (1 − e^(−lr0))` on bar 0.
pub fn pnl_from_positions(
    prices: &[f64],
    positions: &[f64],
    carry_in: f64,
    lr0: Option<f64>,
    costs: &CostModel,
) -> Result<PnlSeries, SizingError> {
    if prices.len() != positions.len() + 1 {
        return Err(SizingError::ShapeMismatch {
            context: "pnl prices".to_string(),
            expected: positions.len() + 1,
            actual: prices.len(),
        });
    }
    if let Some(t) = prices.iter().position(|p| !p.is_finite() || *p <= 0.0) {
        return Err(SizingError::NonFiniteInput {
            bar: t,
            field: "price".to_string(),
        });
    }
    if let Some(t) = positions.iter().position(|p| !p.is_finite()) {
        return Err(SizingError::NonFiniteInput {
            bar: t,
            field: "position".to_string(),
        });
    }

    let t_len = positions.len();
    let mut series = PnlSeries {
        gross: Vec::with_capacity(t_len),
        cost: Vec::with_capacity(t_len),
        net: Vec::with_capacity(t_len),
    };
    let mut prev = carry_in;
    for t in 0..t_len {
        let mut gross = (prices[t + 1] - prices[t]) * positions[t];
        if t == 0 {
            if let Some(gap) = lr0 {
                gross += carry_in * prices[0] * (1.0 - (-gap).exp());
            }
        }
        let cost = costs.trade_cost(positions[t] - prev);
        series.gross.push(gross);
        series.cost.push(cost);
        series.net.push(gross - cost);
        prev = positions[t];
    }
    Ok(series)
}
