use chrono::NaiveDate;
use market_core::{DayBars, MultiDayBars, SkippedDay};

use crate::calendar::{SessionCalendar, SessionConfig};
use crate::normalize::normalize_ref_utc;
use crate::roll::{roll_adj, RollSchedule};
use crate::source::RawBarSource;
use crate::StoreError;

/// Serves normalized multi-day bar batches from a raw archive.
pub struct BarStore<S: RawBarSource> {
    source: S,
    calendar: SessionCalendar,
}

impl<S: RawBarSource> BarStore<S> {
    pub fn new(source: S, config: SessionConfig) -> Result<Self, StoreError> {
        Ok(Self {
            source,
            calendar: SessionCalendar::new(config)?,
        })
    }

    pub fn calendar(&self) -> &SessionCalendar {
        &self.calendar
    }

    pub fn bars_per_day(&self) -> usize {
        self.calendar.bars_per_day()
    }

    /// Normalize a single day. `Ok(None)` when the archive has no file for it.
    pub fn get_day(
        &self,
        symbol: &str,
        day: NaiveDate,
        prev_close: Option<f64>,
    ) -> Result<Option<DayBars>, StoreError> {
        let Some(raw) = self.source.load_day(symbol, day)? else {
            return Ok(None);
        };
        let grid = self.calendar.ref_utc(day);
        normalize_ref_utc(day, &raw, &grid, prev_close).map(Some)
    }

    /// Normalized bars for every trading day in `[start, end]`.
    ///
    /// A day that is missing, fails to normalize, or is mostly synthesized
    /// is recorded in `skipped` and the batch continues. The previous close
    /// carried into each day comes from the last accepted day, shifted by any
    /// roll in between so the opening gap is measured on one contract.
    pub fn get_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        rolls: Option<&RollSchedule>,
    ) -> Result<MultiDayBars, StoreError> {
        let max_fill = self.calendar.config().max_fill_ratio;
        let mut batch = MultiDayBars::new(symbol, self.bars_per_day());
        let mut prev: Option<(NaiveDate, f64)> = None;

        for day in self.calendar.trading_days(start, end) {
            let seed = prev.map(|(pd, pc)| pc + rolls.map_or(0.0, |r| r.offset_between(pd, day)));
            let reason = match self.get_day(symbol, day, seed) {
                Ok(Some(bars)) if bars.fill_ratio() > max_fill => format!(
                    "{:.0}% of bars synthesized (max {:.0}%)",
                    bars.fill_ratio() * 100.0,
                    max_fill * 100.0
                ),
                Ok(Some(bars)) => {
                    if let Some(close) = bars.last_close() {
                        prev = Some((day, close));
                    }
                    batch.push(bars)?;
                    continue;
                }
                Ok(None) => {
                    tracing::debug!(symbol, %day, "no raw data");
                    batch.skipped.push(SkippedDay {
                        day,
                        reason: "no raw data".to_string(),
                    });
                    continue;
                }
                Err(e) => e.to_string(),
            };
            tracing::warn!(symbol, %day, reason = %reason, "skipping day");
            batch.skipped.push(SkippedDay { day, reason });
        }

        if let Some(schedule) = rolls {
            batch = roll_adj(batch, schedule)?;
        }

        tracing::info!(
            symbol,
            days = batch.len(),
            skipped = batch.skipped.len(),
            "loaded bars"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::midnight_utc;
    use crate::roll::RollEvent;
    use crate::source::MemorySource;
    use market_core::Bar;

    fn config() -> SessionConfig {
        SessionConfig {
            bar_seconds: 60,
            session_start_offset_secs: 9 * 3600,
            session_end_offset_secs: 9 * 3600 + 300,
            max_fill_ratio: 0.5,
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn rows(day: NaiveDate, prices: &[f64]) -> Vec<Bar> {
        let start = midnight_utc(day) + 9 * 3600;
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Bar {
                volume: 5,
                ..Bar::flat(start + (i as i64 + 1) * 60, *p, 0.0)
            })
            .collect()
    }

    #[test]
    fn test_get_bars_skips_bad_days_and_continues() {
        let mut src = MemorySource::new();
        src.insert("ES", d(4), rows(d(4), &[10.0, 10.1, 10.2, 10.3, 10.4]));
        src.insert("ES", d(5), rows(d(5), &[11.0]));
        src.insert("ES", d(6), rows(d(6), &[12.0, 12.1]));
        src.insert("ES", d(7), rows(d(7), &[13.0, 13.1, 13.2, 13.3, 13.4]));
        let store = BarStore::new(src, config()).unwrap();

        let batch = store.get_bars("ES", d(4), d(8), None).unwrap();
        assert_eq!(batch.bars_per_day, 5);
        assert_eq!(batch.len(), 2);
        let skipped: Vec<NaiveDate> = batch.skipped.iter().map(|s| s.day).collect();
        assert_eq!(skipped, vec![d(5), d(6), d(8)]);

        // d(7) opens from the last accepted close, not the skipped days
        assert_eq!(batch.days[1].day, d(7));
        assert_eq!(batch.days[1].bars[0].open, 10.4);
        assert!(!batch.roll_adjusted);
    }

    #[test]
    fn test_get_bars_applies_rolls() {
        let mut src = MemorySource::new();
        src.insert("CL", d(4), rows(d(4), &[80.0; 5]));
        src.insert("CL", d(5), rows(d(5), &[82.0; 5]));
        let store = BarStore::new(src, config()).unwrap();
        let schedule = RollSchedule::new(vec![RollEvent { day: d(5), offset: 2.0 }]).unwrap();

        let batch = store.get_bars("CL", d(4), d(5), Some(&schedule)).unwrap();
        assert!(batch.roll_adjusted);
        assert_eq!(batch.days[0].bars[4].close, 82.0);
        // roll day opens flat against the adjusted prior close
        assert_eq!(batch.days[1].bars[0].open, 82.0);
        assert_eq!(batch.days[1].log_returns()[0], 0.0);
    }

    #[test]
    fn test_get_day_missing_is_none() {
        let store = BarStore::new(MemorySource::new(), config()).unwrap();
        assert!(store.get_day("ES", d(4), None).unwrap().is_none());
    }
}
