use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Session grid parameters. Offsets are seconds relative to UTC midnight of
/// the trading day, so an evening-open futures session starts negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub bar_seconds: i64,
    pub session_start_offset_secs: i64,
    pub session_end_offset_secs: i64,
    /// Days whose synthesized-bar fraction exceeds this are skipped.
    pub max_fill_ratio: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bar_seconds: 300,
            session_start_offset_secs: -6 * 3600,
            session_end_offset_secs: 17 * 3600,
            max_fill_ratio: 0.5,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.bar_seconds <= 0 {
            return Err(StoreError::InvalidConfig(format!(
                "bar_seconds must be positive, got {}",
                self.bar_seconds
            )));
        }
        let span = self.session_end_offset_secs - self.session_start_offset_secs;
        if span <= 0 || span % self.bar_seconds != 0 {
            return Err(StoreError::InvalidConfig(format!(
                "session span {span}s is not a positive multiple of {}s",
                self.bar_seconds
            )));
        }
        if !(0.0..=1.0).contains(&self.max_fill_ratio) {
            return Err(StoreError::InvalidConfig(format!(
                "max_fill_ratio must be in [0, 1], got {}",
                self.max_fill_ratio
            )));
        }
        Ok(())
    }
}

/// Weekday trading calendar with a fixed bar grid per day.
#[derive(Debug, Clone)]
pub struct SessionCalendar {
    config: SessionConfig,
}

impl SessionCalendar {
    pub fn new(config: SessionConfig) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn bar_seconds(&self) -> i64 {
        self.config.bar_seconds
    }

    pub fn bars_per_day(&self) -> usize {
        ((self.config.session_end_offset_secs - self.config.session_start_offset_secs)
            / self.config.bar_seconds) as usize
    }

    pub fn is_trading_day(&self, day: NaiveDate) -> bool {
        !matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Trading days in `[start, end]`.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }

    /// Bar-close timestamps of `day`: `midnight + start_offset + (i+1)·bar_seconds`.
    pub fn ref_utc(&self, day: NaiveDate) -> Vec<i64> {
        let start = midnight_utc(day) + self.config.session_start_offset_secs;
        (0..self.bars_per_day())
            .map(|i| start + (i as i64 + 1) * self.config.bar_seconds)
            .collect()
    }
}

/// Epoch seconds of 00:00 UTC on `day`.
pub fn midnight_utc(day: NaiveDate) -> i64 {
    day.signed_duration_since(NaiveDate::default()).num_days() * 86_400
}
