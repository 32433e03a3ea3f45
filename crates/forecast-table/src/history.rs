use nalgebra::DMatrix;

/// Finalized top block of one day's table, as it stood at end of day.
#[derive(Debug, Clone)]
pub(crate) struct DaySnapshot {
    pub values: DMatrix<f64>,
    pub stamps: DMatrix<u64>,
    /// Write stamp of each bar's update that day.
    pub watermarks: Vec<Option<u64>>,
    /// First stamp issued that day.
    pub start_stamp: u64,
}

/// Retained per-day snapshots of a [`crate::ForecastTable`], used to replay
/// the forecast that was live at any past bar.
#[derive(Debug, Clone, Default)]
pub struct ForecastHistory {
    days: Vec<DaySnapshot>,
}

impl ForecastHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of finalized days.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub(crate) fn push(&mut self, snapshot: DaySnapshot) {
        self.days.push(snapshot);
    }

    pub(crate) fn day(&self, d: usize) -> Option<&DaySnapshot> {
        self.days.get(d)
    }
}

/// Highest write stamp visible as of bar `k`'s update.
pub(crate) fn limit_at(watermarks: &[Option<u64>], k: usize, start_stamp: u64) -> u64 {
    watermarks
        .iter()
        .take(k + 1)
        .filter_map(|w| *w)
        .max()
        .unwrap_or(start_stamp.saturating_sub(1))
}

/// Value of the most recent write to `row` with stamp at most `limit`;
/// zero when nothing has been written.
pub(crate) fn latest_in_row(values: &DMatrix<f64>, stamps: &DMatrix<u64>, row: usize, limit: u64) -> f64 {
    let mut best_stamp = 0u64;
    let mut best = 0.0;
    for c in 0..values.ncols() {
        let s = stamps[(row, c)];
        if s > best_stamp && s <= limit {
            best_stamp = s;
            best = values[(row, c)];
        }
    }
    best
}
