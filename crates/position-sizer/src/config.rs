use serde::{Deserialize, Serialize};

use crate::SizingError;

/// Bars `[k0, k1)` of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeWindow {
    pub k0: usize,
    pub k1: usize,
}

impl TradeWindow {
    pub fn contains(&self, bar: usize) -> bool {
        self.k0 <= bar && bar < self.k1
    }
}

/// Intraday override of the variance and cost scaling. Unset fields keep
/// the base config's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingWindow {
    #[serde(flatten)]
    pub window: TradeWindow,
    #[serde(default)]
    pub vs: Option<f64>,
    #[serde(default)]
    pub maxv: Option<f64>,
    #[serde(default)]
    pub expv: Option<f64>,
    #[serde(default)]
    pub tscale: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizerConfig {
    /// Hard cap on |position|, in lots.
    pub maxpos: f64,

    /// Position changes smaller than this are suppressed.
    pub min_trade: f64,

    /// Base variance scale.
    pub vs: f64,

    /// Extra variance scale reached as |position| approaches `maxpos`.
    pub maxv: f64,

    /// Exponent of the position-dependent variance inflation.
    pub expv: f64,

    /// Transaction-cost scale fed to the solver.
    pub tscale: f64,

    /// Per-lot execution cost, in price units.
    pub tcost: f64,

    /// Fixed fee per trade.
    pub fee: f64,

    pub contract_size: f64,

    /// The farthest horizon's cost is this fraction of the nearest one's.
    pub last_cost_fraction: f64,

    /// Scales the mean-variance solver's variance penalty.
    pub risk_aversion: f64,

    /// Per-horizon weights for the solver; all ones when absent.
    pub horizon_weights: Option<Vec<f64>>,

    /// Round targets to whole lots.
    pub integer_lots: bool,

    pub windows: Vec<SizingWindow>,

    /// Bars forced flat.
    pub no_trade: Vec<TradeWindow>,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            maxpos: 10.0,
            min_trade: 1.0,
            vs: 1.0,
            maxv: 0.0,
            expv: 2.0,
            tscale: 1.0,
            tcost: 0.0,
            fee: 0.0,
            contract_size: 1.0,
            last_cost_fraction: 0.2,
            risk_aversion: 1.0,
            horizon_weights: None,
            integer_lots: true,
            windows: Vec::new(),
            no_trade: Vec::new(),
        }
    }
}

/// Variance/cost scaling in force at one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Scaling {
    pub vs: f64,
    pub maxv: f64,
    pub expv: f64,
    pub tscale: f64,
}

impl SizerConfig {
    pub fn validate(&self) -> Result<(), SizingError> {
        let positive = [
            ("maxpos", self.maxpos),
            ("contract_size", self.contract_size),
            ("risk_aversion", self.risk_aversion),
        ];
        for (name, v) in positive {
            if !v.is_finite() || v <= 0.0 {
                return Err(SizingError::InvalidConfig(format!(
                    "{name} must be positive, got {v}"
                )));
            }
        }
        let non_negative = [
            ("min_trade", self.min_trade),
            ("vs", self.vs),
            ("maxv", self.maxv),
            ("expv", self.expv),
            ("tscale", self.tscale),
            ("tcost", self.tcost),
            ("fee", self.fee),
            ("last_cost_fraction", self.last_cost_fraction),
        ];
        for (name, v) in non_negative {
            if !v.is_finite() || v < 0.0 {
                return Err(SizingError::InvalidConfig(format!(
                    "{name} must be non-negative, got {v}"
                )));
            }
        }
        if let Some(w) = &self.horizon_weights {
            if w.iter().any(|x| !x.is_finite() || *x < 0.0) {
                return Err(SizingError::InvalidConfig(
                    "horizon weights must be finite and non-negative".to_string(),
                ));
            }
        }
        for win in self.windows.iter().map(|w| &w.window).chain(&self.no_trade) {
            if win.k0 >= win.k1 {
                return Err(SizingError::InvalidConfig(format!(
                    "empty window [{}, {})",
                    win.k0, win.k1
                )));
            }
        }
        Ok(())
    }

    /// The first sizing window containing `bar` overrides the base scaling.
    pub(crate) fn scaling_at(&self, bar: usize) -> Scaling {
        let base = Scaling {
            vs: self.vs,
            maxv: self.maxv,
            expv: self.expv,
            tscale: self.tscale,
        };
        match self.windows.iter().find(|w| w.window.contains(bar)) {
            Some(w) => Scaling {
                vs: w.vs.unwrap_or(base.vs),
                maxv: w.maxv.unwrap_or(base.maxv),
                expv: w.expv.unwrap_or(base.expv),
                tscale: w.tscale.unwrap_or(base.tscale),
            },
            None => base,
        }
    }

    pub fn is_no_trade(&self, bar: usize) -> bool {
        self.no_trade.iter().any(|w| w.contains(bar))
    }
}
