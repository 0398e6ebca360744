//! Tracked-instrument state and its derived indicator snapshot.

use crate::domain::{Decimal, InstrumentId, Ticker};
use chrono::{DateTime, FixedOffset, Utc};

/// Derived indicator levels for one instrument, immutable once computed for a
/// given candle series. Any field is `None` when the history was too short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorSnapshot {
    pub donchian_long_55: Option<Decimal>,
    pub donchian_short_55: Option<Decimal>,
    pub donchian_long_20: Option<Decimal>,
    pub donchian_short_20: Option<Decimal>,
    pub atr14: Option<Decimal>,
    pub computed_at: DateTime<Utc>,
}

impl IndicatorSnapshot {
    /// True if the snapshot was computed on the same calendar day as `now`
    /// in the venue's trading timezone. Stale snapshots are recomputed on the
    /// next onboarding pass.
    pub fn is_fresh(&self, now: DateTime<Utc>, venue_tz: FixedOffset) -> bool {
        self.computed_at.with_timezone(&venue_tz).date_naive()
            == now.with_timezone(&venue_tz).date_naive()
    }
}

/// Per-instrument tracking record as stored in the `instruments` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentState {
    pub instrument_id: InstrumentId,
    pub ticker: Ticker,
    /// Whether the instrument participates in threshold checks at all.
    pub tracked: bool,
    /// Notify-once gate: flips to false on a crossing, re-armed externally.
    pub notify_armed: bool,
    pub indicators: IndicatorSnapshot,
}
