use chrono::NaiveDate;
use market_core::{stats, SkippedDay};
use serde::{Deserialize, Serialize};

/// One sized day of one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayReport {
    pub day: NaiveDate,
    pub gross: f64,
    pub cost: f64,
    pub net: f64,
    /// Sum of `|Δposition|` charged on this day.
    pub turnover: f64,
    pub trades: usize,
    /// Bars where the solver failed and the position was held.
    pub solver_fallbacks: usize,
    /// Net PnL of the interval ending at the close of each bar.
    pub bar_pnl: Vec<f64>,
    /// Position decided at the close of each bar.
    pub positions: Vec<f64>,
}

/// PnL of bars `[bar_start, bar_end)` summed over every reported day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPnl {
    pub group: usize,
    pub bar_start: usize,
    pub bar_end: usize,
    pub pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub bars_per_day: usize,
    pub days: Vec<DayReport>,
    pub skipped: Vec<SkippedDay>,
    pub total_pnl: f64,
    pub total_gross: f64,
    pub total_cost: f64,
    /// Annualized Sharpe of daily net PnL.
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub turnover: f64,
    pub trades: usize,
    pub group_pnl: Vec<GroupPnl>,
    pub profitable_groups: Vec<usize>,
    /// Position carried past the last reported bar.
    pub final_position: f64,
    pub quality_warnings: Vec<String>,
}

impl SymbolReport {
    pub fn from_days(
        symbol: &str,
        bars_per_day: usize,
        days: Vec<DayReport>,
        group_bars: usize,
        periods_per_year: f64,
    ) -> Self {
        let daily: Vec<f64> = days.iter().map(|d| d.net).collect();
        let group_pnl = time_of_day_groups(&days, bars_per_day, group_bars);
        let profitable_groups = select_profitable_groups(&group_pnl);
        let final_position = days
            .last()
            .and_then(|d| d.positions.last().copied())
            .unwrap_or(0.0);

        Self {
            symbol: symbol.to_string(),
            bars_per_day,
            total_pnl: daily.iter().sum(),
            total_gross: days.iter().map(|d| d.gross).sum(),
            total_cost: days.iter().map(|d| d.cost).sum(),
            sharpe: stats::annualized_sharpe(&daily, periods_per_year),
            max_drawdown: stats::max_drawdown(&daily),
            turnover: days.iter().map(|d| d.turnover).sum(),
            trades: days.iter().map(|d| d.trades).sum(),
            group_pnl,
            profitable_groups,
            final_position,
            days,
            skipped: Vec::new(),
            quality_warnings: Vec::new(),
        }
    }

    pub fn daily_pnl(&self) -> Vec<f64> {
        self.days.iter().map(|d| d.net).collect()
    }
}

/// Sum bar PnL into consecutive time-of-day groups of `group_bars` bars.
/// The last group is shorter when `group_bars` does not divide `n`.
pub fn time_of_day_groups(days: &[DayReport], n: usize, group_bars: usize) -> Vec<GroupPnl> {
    if n == 0 || group_bars == 0 {
        return Vec::new();
    }
    let mut groups: Vec<GroupPnl> = (0..n.div_ceil(group_bars))
        .map(|g| GroupPnl {
            group: g,
            bar_start: g * group_bars,
            bar_end: ((g + 1) * group_bars).min(n),
            pnl: 0.0,
        })
        .collect();
    for day in days {
        for (t, pnl) in day.bar_pnl.iter().enumerate().take(n) {
            groups[t / group_bars].pnl += pnl;
        }
    }
    groups
}

/// Groups that made money, best first.
pub fn select_profitable_groups(groups: &[GroupPnl]) -> Vec<usize> {
    let mut winners: Vec<&GroupPnl> = groups.iter().filter(|g| g.pnl > 0.0).collect();
    winners.sort_by(|a, b| b.pnl.total_cmp(&a.pnl));
    winners.into_iter().map(|g| g.group).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: String,
}

/// Outcome of a multi-symbol run. A failed symbol does not abort the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniverseReport {
    pub reports: Vec<SymbolReport>,
    pub failures: Vec<SymbolFailure>,
}

impl UniverseReport {
    pub fn total_pnl(&self) -> f64 {
        self.reports.iter().map(|r| r.total_pnl).sum()
    }

    pub fn report(&self, symbol: &str) -> Option<&SymbolReport> {
        self.reports.iter().find(|r| r.symbol == symbol)
    }
}
