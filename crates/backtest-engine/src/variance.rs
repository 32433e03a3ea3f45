use anyhow::{bail, Result};
use nalgebra::DMatrix;
use statrs::statistics::Statistics;

/// Per-bar-of-day standard deviation of log returns.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceProfile {
    stdv: Vec<f64>,
}

impl VarianceProfile {
    pub fn uniform(n: usize) -> Self {
        Self { stdv: vec![1.0; n] }
    }

    /// Estimate from rows `[upto - lookback, upto)` of a `days × n` return
    /// matrix, so day `upto` never sees its own returns. Each bar's estimate
    /// is floored at `floor`.
    pub fn from_returns(returns: &DMatrix<f64>, upto: usize, lookback: usize, floor: f64) -> Result<Self> {
        if upto == 0 || upto > returns.nrows() {
            bail!(
                "variance profile needs 1..={} prior days, asked for {upto}",
                returns.nrows()
            );
        }
        if lookback == 0 {
            bail!("variance profile lookback must be at least one day");
        }
        let first = upto.saturating_sub(lookback);
        let rows = upto - first;
        let window = returns.rows(first, rows);

        let stdv = (0..returns.ncols())
            .map(|k| {
                let col: Vec<f64> = window.column(k).iter().copied().collect();
                let sd = if col.len() < 2 {
                    col[0].abs()
                } else {
                    col.iter().std_dev()
                };
                if sd.is_finite() {
                    sd.max(floor)
                } else {
                    floor
                }
            })
            .collect();
        Ok(Self { stdv })
    }

    pub fn stdv(&self) -> &[f64] {
        &self.stdv
    }

    pub fn len(&self) -> usize {
        self.stdv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stdv.is_empty()
    }
}
