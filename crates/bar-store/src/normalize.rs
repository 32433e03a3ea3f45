use chrono::NaiveDate;
use market_core::{Bar, DayBars};

use crate::StoreError;

/// Normalize one day's raw rows onto the `ref_utc` grid.
///
/// Each grid bar `i` covers `(ref_utc[i] - bar_seconds, ref_utc[i]]`; raw
/// rows inside it are merged (open = first, high = max, low = min,
/// close = last, volumes summed). Rows with a non-positive or non-finite
/// price are dropped.
///
/// Missing bars are synthesized flat with zero volume:
/// - leading bars before the first observed row use `prev_close` when known,
///   else the first observed row's open;
/// - interior and trailing bars forward-fill the last close.
///
/// When `prev_close` is known the first bar's open is set to it, so the
/// first bar's return includes the overnight gap.
pub fn normalize_ref_utc(
    day: NaiveDate,
    raw_bars: &[Bar],
    ref_utc: &[i64],
    prev_close: Option<f64>,
) -> Result<DayBars, StoreError> {
    if raw_bars.len() < 2 {
        return Err(StoreError::InsufficientData {
            day,
            reason: format!("{} raw rows, need at least 2", raw_bars.len()),
        });
    }
    let bar_seconds = grid_spacing(ref_utc)?;
    if raw_bars.windows(2).any(|w| w[1].utc < w[0].utc) {
        return Err(StoreError::InvalidData(format!(
            "{day}: raw rows are not ordered by utc"
        )));
    }

    let valid: Vec<&Bar> = raw_bars.iter().filter(|b| b.has_valid_price()).collect();
    let dropped = raw_bars.len() - valid.len();
    if dropped > 0 {
        tracing::warn!(%day, dropped, "dropped raw rows with invalid prices");
    }

    let n = ref_utc.len();
    let grid_open = ref_utc[0] - bar_seconds;
    let mut buckets: Vec<Option<Bar>> = vec![None; n];
    for raw in valid {
        let offset = raw.utc - grid_open;
        if offset <= 0 || raw.utc > ref_utc[n - 1] {
            continue;
        }
        let i = ((offset - 1) / bar_seconds) as usize;
        if let Some(agg) = buckets[i].as_mut() {
            merge_into(agg, raw);
        } else {
            let mut first = *raw;
            first.utc = ref_utc[i];
            buckets[i] = Some(first);
        }
    }

    let first_open = match buckets.iter().flatten().next() {
        Some(b) => b.open,
        None => {
            return Err(StoreError::InsufficientData {
                day,
                reason: "raw rows do not overlap the session grid".to_string(),
            })
        }
    };

    let seed = prev_close.unwrap_or(first_open);
    let mut bars = Vec::with_capacity(n);
    let mut synthesized = Vec::with_capacity(n);
    let mut last: Option<(f64, f64)> = None;
    let mut leading = 0usize;
    let mut filled = 0usize;

    for (i, bucket) in buckets.into_iter().enumerate() {
        match bucket {
            Some(bar) => {
                last = Some((bar.close, bar.last_trade_time));
                bars.push(bar);
                synthesized.push(false);
            }
            None => {
                let bar = match last {
                    Some((close, ltt)) => {
                        filled += 1;
                        Bar::flat(ref_utc[i], close, ltt)
                    }
                    None => {
                        leading += 1;
                        Bar::flat(ref_utc[i], seed, 0.0)
                    }
                };
                bars.push(bar);
                synthesized.push(true);
            }
        }
    }

    if let Some(pc) = prev_close {
        let b0 = &mut bars[0];
        b0.open = pc;
        b0.high = b0.high.max(pc);
        b0.low = b0.low.min(pc);
    }

    if leading > 0 {
        tracing::info!(
            %day,
            leading,
            from_prev_close = prev_close.is_some(),
            "backfilled leading bars"
        );
    }
    if filled > 0 {
        tracing::debug!(%day, filled, "forward-filled missing bars");
    }

    Ok(DayBars {
        day,
        bar_seconds,
        bars,
        synthesized,
    })
}

fn merge_into(agg: &mut Bar, raw: &Bar) {
    agg.high = agg.high.max(raw.high);
    agg.low = agg.low.min(raw.low);
    agg.close = raw.close;
    agg.volume += raw.volume;
    agg.volume_imbalance += raw.volume_imbalance;
    agg.last_trade_price = raw.last_trade_price;
    agg.last_trade_time = raw.last_trade_time;
}

/// Fixed spacing of a strictly increasing grid.
fn grid_spacing(ref_utc: &[i64]) -> Result<i64, StoreError> {
    if ref_utc.len() < 2 {
        return Err(StoreError::InvalidData(format!(
            "reference grid needs at least 2 bars, got {}",
            ref_utc.len()
        )));
    }
    let step = ref_utc[1] - ref_utc[0];
    if step <= 0 || ref_utc.windows(2).any(|w| w[1] - w[0] != step) {
        return Err(StoreError::InvalidData(
            "reference grid must be strictly increasing with fixed spacing".to_string(),
        ));
    }
    Ok(step)
}
