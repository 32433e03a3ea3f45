use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use forecast_table::{ForecastError, ForecastSource, HorizonIndex};
use market_core::MultiDayBars;
use nalgebra::DMatrix;

use crate::config::{ModelConfig, ModelKind};

/// Replays precomputed `n × nf` coarse forecasts, one matrix per day.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: String,
    ixf: Vec<usize>,
    days: HashMap<NaiveDate, DMatrix<f64>>,
}

impl ReplaySource {
    pub fn new(name: &str, ixf: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            ixf,
            days: HashMap::new(),
        }
    }

    pub fn insert_day(&mut self, day: NaiveDate, coarse: DMatrix<f64>) -> Result<()> {
        if coarse.ncols() != self.ixf.len() {
            bail!(
                "{}: forecasts for {day} have {} columns, horizon has {}",
                self.name,
                coarse.ncols(),
                self.ixf.len()
            );
        }
        self.days.insert(day, coarse);
        Ok(())
    }

    /// Load `<dir>/<symbol>/<YYYYMMDD>.json` (a JSON array of rows) for each
    /// of `days`. Missing files leave the day empty.
    pub fn load_dir(
        name: &str,
        ixf: Vec<usize>,
        dir: &Path,
        symbol: &str,
        days: &[NaiveDate],
        n: usize,
    ) -> Result<Self> {
        let mut source = Self::new(name, ixf);
        let nf = source.ixf.len();
        for day in days {
            let path = dir.join(symbol).join(format!("{}.json", day.format("%Y%m%d")));
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading forecasts {}", path.display()))?;
            let rows: Vec<Vec<f64>> = serde_json::from_str(&text)
                .with_context(|| format!("parsing forecasts {}", path.display()))?;
            if rows.len() != n || rows.iter().any(|r| r.len() != nf) {
                bail!("{}: expected {n} rows of {nf} forecasts", path.display());
            }
            source.insert_day(*day, DMatrix::from_fn(n, nf, |k, i| rows[k][i]))?;
        }
        tracing::debug!(model = name, symbol, days = source.days.len(), "loaded replay forecasts");
        Ok(source)
    }
}

impl ForecastSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn horizon(&self) -> &[usize] {
        &self.ixf
    }

    fn produce(&mut self, day: NaiveDate, bar: usize) -> Result<Option<Vec<f64>>, ForecastError> {
        Ok(self
            .days
            .get(&day)
            .filter(|m| bar < m.nrows())
            .map(|m| m.row(bar).iter().copied().collect()))
    }
}

/// Autoregressive model on bar log returns: the return `j+1` bars ahead is
/// forecast as `phi^(j+1) · r_k`, summed per bucket.
#[derive(Debug, Clone)]
pub struct Ar1Source {
    name: String,
    ixf: HorizonIndex,
    returns: HashMap<NaiveDate, Vec<f64>>,
    phi: HashMap<NaiveDate, f64>,
}

impl Ar1Source {
    /// `phi` is fixed when given, otherwise estimated for each day from the
    /// preceding `lookback_days` of bar returns.
    pub fn from_bars(
        name: &str,
        ixf: Vec<usize>,
        bars: &MultiDayBars,
        phi: Option<f64>,
        lookback_days: usize,
    ) -> Result<Self> {
        let ixf = HorizonIndex::new(ixf, bars.bars_per_day)?;
        let mut returns = HashMap::new();
        let mut phis = HashMap::new();
        for (d, day) in bars.days.iter().enumerate() {
            returns.insert(day.day, day.log_returns());
            let coef = match phi {
                Some(p) => p,
                None => {
                    let start = d.saturating_sub(lookback_days);
                    let history: Vec<f64> = bars.days[start..d]
                        .iter()
                        .flat_map(|b| b.log_returns())
                        .collect();
                    estimate_phi(&history)
                }
            };
            phis.insert(day.day, coef);
        }
        Ok(Self {
            name: name.to_string(),
            ixf,
            returns,
            phi: phis,
        })
    }

    pub fn phi_for(&self, day: NaiveDate) -> Option<f64> {
        self.phi.get(&day).copied()
    }
}

/// Least-squares lag-1 coefficient, clamped inside the unit interval.
pub fn estimate_phi(series: &[f64]) -> f64 {
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for w in series.windows(2) {
        sum_xy += w[0] * w[1];
        sum_x2 += w[0] * w[0];
    }
    if sum_x2 == 0.0 {
        return 0.0;
    }
    (sum_xy / sum_x2).clamp(-0.99, 0.99)
}

impl ForecastSource for Ar1Source {
    fn name(&self) -> &str {
        &self.name
    }

    fn horizon(&self) -> &[usize] {
        self.ixf.as_slice()
    }

    fn produce(&mut self, day: NaiveDate, bar: usize) -> Result<Option<Vec<f64>>, ForecastError> {
        let (Some(returns), Some(phi)) = (self.returns.get(&day), self.phi.get(&day)) else {
            return Ok(None);
        };
        let Some(r) = returns.get(bar) else {
            return Ok(None);
        };
        let coarse = (0..self.ixf.nf())
            .map(|i| {
                (self.ixf.bucket_start(i)..=self.ixf.bucket_end(i))
                    .map(|j| phi.powi(j as i32 + 1) * r)
                    .sum()
            })
            .collect();
        Ok(Some(coarse))
    }
}

/// Build the configured sources for one symbol.
pub fn build_sources(
    models: &[ModelConfig],
    symbol: &str,
    bars: &MultiDayBars,
) -> Result<Vec<Box<dyn ForecastSource + Send>>> {
    let days: Vec<NaiveDate> = bars.days.iter().map(|d| d.day).collect();
    models
        .iter()
        .map(|m| -> Result<Box<dyn ForecastSource + Send>> {
            Ok(match &m.kind {
                ModelKind::Replay { dir } => Box::new(ReplaySource::load_dir(
                    &m.name,
                    m.horizon.clone(),
                    dir,
                    symbol,
                    &days,
                    bars.bars_per_day,
                )?),
                ModelKind::Ar1 { phi, lookback_days } => Box::new(Ar1Source::from_bars(
                    &m.name,
                    m.horizon.clone(),
                    bars,
                    *phi,
                    *lookback_days,
                )?),
            })
        })
        .collect()
}
