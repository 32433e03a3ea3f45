//! Small summary statistics shared by the sizing and reporting layers.
//!
//! Empty or degenerate inputs return 0.0 rather than NaN so report fields
//! stay finite.

use statrs::statistics::Statistics;

/// Arithmetic mean; 0.0 for an empty series.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.mean()
}

/// Sample (n - 1) standard deviation; 0.0 below two points.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    data.std_dev()
}

/// Mean over standard deviation, unannualized.
pub fn sharpe(data: &[f64]) -> f64 {
    let sd = std_dev(data);
    if sd < f64::EPSILON {
        return 0.0;
    }
    mean(data) / sd
}

/// Sharpe scaled by `sqrt(periods_per_year)`.
pub fn annualized_sharpe(data: &[f64], periods_per_year: f64) -> f64 {
    sharpe(data) * periods_per_year.sqrt()
}

/// Running sum.
pub fn cumsum(data: &[f64]) -> Vec<f64> {
    data.iter()
        .scan(0.0, |acc, x| {
            *acc += x;
            Some(*acc)
        })
        .collect()
}

/// Largest peak-to-trough decline of the cumulative sum of `pnl`, in pnl units.
pub fn max_drawdown(pnl: &[f64]) -> f64 {
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    for equity in cumsum(pnl) {
        peak = peak.max(equity);
        max_dd = max_dd.max(peak - equity);
    }
    max_dd
}
