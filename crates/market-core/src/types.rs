use chrono::NaiveDate;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::MarketError;

/// One bar row: the 9-column layout shared by raw vendor files and
/// normalized day grids.
///
/// On the wire (JSON) a bar is a plain array
/// `[utc, open, high, low, close, volume, last_trade_price, last_trade_time, volume_imbalance]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "BarRow", into = "BarRow")]
pub struct Bar {
    /// Bar-close epoch seconds.
    pub utc: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub last_trade_price: f64,
    pub last_trade_time: f64,
    /// Buy volume minus sell volume.
    pub volume_imbalance: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BarRow(i64, f64, f64, f64, f64, i64, f64, f64, i64);

impl From<BarRow> for Bar {
    fn from(r: BarRow) -> Self {
        Bar {
            utc: r.0,
            open: r.1,
            high: r.2,
            low: r.3,
            close: r.4,
            volume: r.5,
            last_trade_price: r.6,
            last_trade_time: r.7,
            volume_imbalance: r.8,
        }
    }
}

impl From<Bar> for BarRow {
    fn from(b: Bar) -> Self {
        BarRow(
            b.utc,
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume,
            b.last_trade_price,
            b.last_trade_time,
            b.volume_imbalance,
        )
    }
}

/// Column selector for the 9-column bar layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarField {
    Utc,
    Open,
    High,
    Low,
    Close,
    Volume,
    LastTradePrice,
    LastTradeTime,
    VolumeImbalance,
}

impl BarField {
    pub const ALL: [BarField; 9] = [
        BarField::Utc,
        BarField::Open,
        BarField::High,
        BarField::Low,
        BarField::Close,
        BarField::Volume,
        BarField::LastTradePrice,
        BarField::LastTradeTime,
        BarField::VolumeImbalance,
    ];

    /// Price-level fields, i.e. the ones shifted by a futures roll adjustment.
    pub fn is_price(&self) -> bool {
        matches!(
            self,
            BarField::Open
                | BarField::High
                | BarField::Low
                | BarField::Close
                | BarField::LastTradePrice
        )
    }
}

impl Bar {
    /// A flat bar at `price` with no trading activity.
    pub fn flat(utc: i64, price: f64, last_trade_time: f64) -> Self {
        Bar {
            utc,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0,
            last_trade_price: price,
            last_trade_time,
            volume_imbalance: 0,
        }
    }

    pub fn field(&self, field: BarField) -> f64 {
        match field {
            BarField::Utc => self.utc as f64,
            BarField::Open => self.open,
            BarField::High => self.high,
            BarField::Low => self.low,
            BarField::Close => self.close,
            BarField::Volume => self.volume as f64,
            BarField::LastTradePrice => self.last_trade_price,
            BarField::LastTradeTime => self.last_trade_time,
            BarField::VolumeImbalance => self.volume_imbalance as f64,
        }
    }

    /// `ln(close/open)`; zero when either price is not positive.
    pub fn log_return(&self) -> f64 {
        if self.open > 0.0 && self.close > 0.0 {
            (self.close / self.open).ln()
        } else {
            0.0
        }
    }

    pub fn has_valid_price(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
    }

    /// Add a constant to every price-level field.
    pub fn shift_prices(&mut self, offset: f64) {
        self.open += offset;
        self.high += offset;
        self.low += offset;
        self.close += offset;
        self.last_trade_price += offset;
    }

    pub fn to_row(&self) -> [f64; 9] {
        let mut row = [0.0; 9];
        for (i, f) in BarField::ALL.iter().enumerate() {
            row[i] = self.field(*f);
        }
        row
    }
}

/// One trading day normalized onto its fixed bar grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayBars {
    pub day: NaiveDate,
    pub bar_seconds: i64,
    pub bars: Vec<Bar>,
    /// `true` where the row was synthesized by gap filling rather than observed.
    pub synthesized: Vec<bool>,
}

impl DayBars {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn log_returns(&self) -> Vec<f64> {
        self.bars.iter().map(Bar::log_return).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    pub fn synthesized_count(&self) -> usize {
        self.synthesized.iter().filter(|s| **s).count()
    }

    pub fn fill_ratio(&self) -> f64 {
        if self.bars.is_empty() {
            return 0.0;
        }
        self.synthesized_count() as f64 / self.bars.len() as f64
    }

    pub fn to_rows(&self) -> Vec<[f64; 9]> {
        self.bars.iter().map(Bar::to_row).collect()
    }
}

/// A day the store declined to produce, with the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedDay {
    pub day: NaiveDate,
    pub reason: String,
}

/// A batch of normalized days for one symbol: `Array[ndays, n, 9]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiDayBars {
    pub symbol: String,
    pub bars_per_day: usize,
    pub days: Vec<DayBars>,
    #[serde(default)]
    pub skipped: Vec<SkippedDay>,
    /// Set once a roll schedule has been applied to `days`.
    #[serde(default)]
    pub roll_adjusted: bool,
}

impl MultiDayBars {
    pub fn new(symbol: &str, bars_per_day: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            bars_per_day,
            days: Vec::new(),
            skipped: Vec::new(),
            roll_adjusted: false,
        }
    }

    /// Append a day, enforcing the fixed per-day bar count.
    pub fn push(&mut self, day: DayBars) -> Result<(), MarketError> {
        if day.len() != self.bars_per_day {
            return Err(MarketError::ShapeMismatch {
                context: format!("{} bars on {}", self.symbol, day.day),
                expected: self.bars_per_day,
                actual: day.len(),
            });
        }
        if let Some(last) = self.days.last() {
            if day.day <= last.day {
                return Err(MarketError::InvalidData(format!(
                    "{}: day {} is not after {}",
                    self.symbol, day.day, last.day
                )));
            }
        }
        self.days.push(day);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn day_index(&self, day: NaiveDate) -> Option<usize> {
        self.days.iter().position(|d| d.day == day)
    }

    /// `ndays × n` matrix of one field.
    pub fn field_matrix(&self, field: BarField) -> DMatrix<f64> {
        DMatrix::from_fn(self.days.len(), self.bars_per_day, |d, k| {
            self.days[d].bars[k].field(field)
        })
    }

    /// `ndays × n` matrix of per-bar `ln(close/open)`.
    pub fn log_return_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.days.len(), self.bars_per_day, |d, k| {
            self.days[d].bars[k].log_return()
        })
    }
}
