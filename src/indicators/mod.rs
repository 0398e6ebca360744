//! Indicator math: rolling Donchian channel extrema and Wilder ATR.
//!
//! Pure functions over a completed-candle series. Insufficient history is a
//! `None`, never an error; callers treat an undefined level as "no decision
//! possible".

use crate::domain::{Candle, Decimal, IndicatorSnapshot};
use chrono::{DateTime, Utc};

/// Slow Donchian window used for breakout entries.
pub const DONCHIAN_SLOW: usize = 55;
/// Fast Donchian window used for stop levels.
pub const DONCHIAN_FAST: usize = 20;
/// Wilder ATR smoothing period.
pub const ATR_PERIOD: usize = 14;

/// Highest high over the last `window` candles, or `None` if fewer exist.
pub fn donchian_high(candles: &[Candle], window: usize) -> Option<Decimal> {
    if window == 0 || candles.len() < window {
        return None;
    }
    candles[candles.len() - window..]
        .iter()
        .map(|c| c.high)
        .max()
}

/// Lowest low over the last `window` candles, or `None` if fewer exist.
pub fn donchian_low(candles: &[Candle], window: usize) -> Option<Decimal> {
    if window == 0 || candles.len() < window {
        return None;
    }
    candles[candles.len() - window..]
        .iter()
        .map(|c| c.low)
        .min()
}

/// Wilder's Average True Range.
///
/// TR_t = max(high_t − low_t, |high_t − close_{t−1}|, |low_t − close_{t−1}|)
/// for t ≥ 1. The seed is the arithmetic mean of the first `period` TRs, after
/// which `atr = (atr * (period − 1) + tr) / period`. Returns the final
/// smoothed value, or `None` with fewer than `period + 1` candles.
pub fn wilder_atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|w| true_range(&w[1], &w[0]))
        .collect();

    let period_d = Decimal::from(period as i64);
    let mut atr = true_ranges[..period]
        .iter()
        .fold(Decimal::zero(), |acc, tr| acc + *tr)
        / period_d;

    let weight = Decimal::from(period as i64 - 1);
    for tr in &true_ranges[period..] {
        atr = (atr * weight + *tr) / period_d;
    }

    Some(atr)
}

fn true_range(current: &Candle, previous: &Candle) -> Decimal {
    let hl = current.high - current.low;
    let hc = (current.high - previous.close).abs();
    let lc = (current.low - previous.close).abs();
    hl.max(hc).max(lc)
}

/// Compute the full indicator snapshot from raw venue candles.
///
/// Incomplete candles are dropped and the remainder is sorted by time, so the
/// result depends only on the candle set, never on delivery order or wall
/// clock.
pub fn compute_snapshot(candles: &[Candle], computed_at: DateTime<Utc>) -> IndicatorSnapshot {
    let mut completed: Vec<Candle> = candles.iter().filter(|c| c.is_complete).cloned().collect();
    completed.sort_by_key(|c| c.time);

    IndicatorSnapshot {
        donchian_long_55: donchian_high(&completed, DONCHIAN_SLOW),
        donchian_short_55: donchian_low(&completed, DONCHIAN_SLOW),
        donchian_long_20: donchian_high(&completed, DONCHIAN_FAST),
        donchian_short_20: donchian_low(&completed, DONCHIAN_FAST),
        atr14: wilder_atr(&completed, ATR_PERIOD),
        computed_at,
    }
}
