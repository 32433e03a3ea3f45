use chrono::NaiveDate;
use market_core::MultiDayBars;
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// One contract roll: from `day` onward the series trades the new contract,
/// whose price sits `offset` above the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollEvent {
    pub day: NaiveDate,
    pub offset: f64,
}

/// Futures roll dates with their price offsets, ordered by day.
///
/// Serialized as a plain list of events; deserialization validates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RollEvent>", into = "Vec<RollEvent>")]
pub struct RollSchedule {
    rolls: Vec<RollEvent>,
}

impl TryFrom<Vec<RollEvent>> for RollSchedule {
    type Error = StoreError;

    fn try_from(rolls: Vec<RollEvent>) -> Result<Self, Self::Error> {
        Self::new(rolls)
    }
}

impl From<RollSchedule> for Vec<RollEvent> {
    fn from(schedule: RollSchedule) -> Self {
        schedule.rolls
    }
}

impl RollSchedule {
    pub fn new(mut rolls: Vec<RollEvent>) -> Result<Self, StoreError> {
        if let Some(bad) = rolls.iter().find(|r| !r.offset.is_finite()) {
            return Err(StoreError::InvalidData(format!(
                "roll on {} has non-finite offset",
                bad.day
            )));
        }
        rolls.sort_by_key(|r| r.day);
        if rolls.windows(2).any(|w| w[0].day == w[1].day) {
            return Err(StoreError::InvalidData(
                "roll schedule has two rolls on one day".to_string(),
            ));
        }
        Ok(Self { rolls })
    }

    pub fn rolls(&self) -> &[RollEvent] {
        &self.rolls
    }

    pub fn is_empty(&self) -> bool {
        self.rolls.is_empty()
    }

    /// Cumulative offset for `day`: the sum over every roll strictly after it.
    pub fn offset_for(&self, day: NaiveDate) -> f64 {
        self.rolls
            .iter()
            .filter(|r| r.day > day)
            .map(|r| r.offset)
            .sum()
    }

    /// Sum of offsets of rolls in `(after, until]`.
    pub fn offset_between(&self, after: NaiveDate, until: NaiveDate) -> f64 {
        self.rolls
            .iter()
            .filter(|r| r.day > after && r.day <= until)
            .map(|r| r.offset)
            .sum()
    }
}

/// Back-adjust every day strictly before each roll so the whole series is
/// quoted at the latest contract's level.
///
/// The adjustment is cumulative and recorded on the batch; a second call on
/// an already-adjusted batch is rejected.
pub fn roll_adj(mut bars: MultiDayBars, schedule: &RollSchedule) -> Result<MultiDayBars, StoreError> {
    if bars.roll_adjusted {
        return Err(StoreError::RollAlreadyApplied(bars.symbol));
    }

    let mut adjusted_days = 0usize;
    for day in bars.days.iter_mut() {
        let offset = schedule.offset_for(day.day);
        if offset != 0.0 {
            adjusted_days += 1;
            for bar in day.bars.iter_mut() {
                bar.shift_prices(offset);
            }
        }
    }
    bars.roll_adjusted = true;

    tracing::debug!(symbol = %bars.symbol, adjusted_days, "applied roll adjustment");
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::{Bar, DayBars};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn batch() -> MultiDayBars {
        let mut mdb = MultiDayBars::new("CL", 2);
        for day in [4, 5, 6, 7] {
            mdb.push(DayBars {
                day: d(day),
                bar_seconds: 300,
                bars: vec![Bar::flat(0, 100.0, 0.0), Bar::flat(300, 101.0, 0.0)],
                synthesized: vec![false; 2],
            })
            .unwrap();
        }
        mdb
    }

    fn schedule() -> RollSchedule {
        RollSchedule::new(vec![
            RollEvent { day: d(7), offset: 0.5 },
            RollEvent { day: d(5), offset: 2.0 },
        ])
        .unwrap()
    }

    #[test]
    fn test_offsets_accumulate_backwards() {
        let s = schedule();
        assert_eq!(s.offset_for(d(4)), 2.5);
        assert_eq!(s.offset_for(d(5)), 0.5);
        assert_eq!(s.offset_for(d(6)), 0.5);
        assert_eq!(s.offset_for(d(7)), 0.0);
        assert_eq!(s.offset_between(d(4), d(6)), 2.0);
    }

    #[test]
    fn test_roll_adj_shifts_days_before_each_roll() {
        let out = roll_adj(batch(), &schedule()).unwrap();
        assert!(out.roll_adjusted);
        assert_eq!(out.days[0].bars[1].close, 103.5);
        assert_eq!(out.days[0].bars[0].last_trade_price, 102.5);
        assert_eq!(out.days[1].bars[0].open, 100.5);
        assert_eq!(out.days[3].bars[0].close, 100.0);
        assert_eq!(out.days[0].bars[0].volume, 0);
    }

    #[test]
    fn test_roll_adj_twice_is_rejected() {
        let once = roll_adj(batch(), &schedule()).unwrap();
        assert!(matches!(
            roll_adj(once, &schedule()),
            Err(StoreError::RollAlreadyApplied(_))
        ));
    }

    #[test]
    fn test_schedule_validation() {
        let dup = vec![
            RollEvent { day: d(5), offset: 1.0 },
            RollEvent { day: d(5), offset: 2.0 },
        ];
        assert!(RollSchedule::new(dup).is_err());
        assert!(RollSchedule::new(vec![RollEvent { day: d(5), offset: f64::NAN }]).is_err());
    }

    #[test]
    fn test_schedule_deserializes_through_validation() {
        let parsed: RollSchedule = serde_json::from_str(
            r#"[{"day": "2024-03-07", "offset": 0.5}, {"day": "2024-03-05", "offset": 2.0}]"#,
        )
        .unwrap();
        assert_eq!(parsed, schedule());
        assert_eq!(serde_json::to_value(&parsed).unwrap()[0]["offset"], 2.0);

        let dup = r#"[{"day": "2024-03-05", "offset": 1.0}, {"day": "2024-03-05", "offset": 2.0}]"#;
        assert!(serde_json::from_str::<RollSchedule>(dup).is_err());
    }
}
