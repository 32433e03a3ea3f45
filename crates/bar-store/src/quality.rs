use chrono::NaiveDate;
use market_core::DayBars;
use serde::{Deserialize, Serialize};

/// Data-quality summary of one normalized day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayQualityReport {
    pub day: NaiveDate,
    pub total_bars: usize,
    pub synthesized_bars: usize,
    /// Observed (not synthesized) bars with no volume.
    pub zero_volume_bars: usize,
    pub ohlc_inconsistent_bars: usize,
    /// Longest run of consecutive synthesized bars.
    pub longest_gap: usize,
    pub warnings: Vec<String>,
}

impl DayQualityReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Check a normalized day for zero-volume bars, OHLC inconsistencies and
/// gaps longer than `max_gap` bars.
pub fn check_day_quality(day: &DayBars, max_gap: usize) -> DayQualityReport {
    let mut zero_volume_bars = 0usize;
    let mut ohlc_inconsistent_bars = 0usize;
    let mut longest_gap = 0usize;
    let mut run = 0usize;
    let mut warnings = Vec::new();

    for (i, (bar, synth)) in day.bars.iter().zip(&day.synthesized).enumerate() {
        if *synth {
            run += 1;
            longest_gap = longest_gap.max(run);
        } else {
            run = 0;
            if bar.volume <= 0 {
                zero_volume_bars += 1;
            }
        }

        let (o, h, l, c) = (bar.open, bar.high, bar.low, bar.close);
        if h < l || h < o || h < c || l > o || l > c {
            ohlc_inconsistent_bars += 1;
            warnings.push(format!(
                "bar {i}: OHLC inconsistent O={o:.4} H={h:.4} L={l:.4} C={c:.4}"
            ));
        }
    }

    if zero_volume_bars > 0 {
        warnings.push(format!("{zero_volume_bars} observed bars with zero volume"));
    }
    if longest_gap > max_gap {
        warnings.push(format!(
            "gap of {longest_gap} consecutive synthesized bars (max {max_gap})"
        ));
    }

    DayQualityReport {
        day: day.day,
        total_bars: day.len(),
        synthesized_bars: day.synthesized_count(),
        zero_volume_bars,
        ohlc_inconsistent_bars,
        longest_gap,
        warnings,
    }
}
