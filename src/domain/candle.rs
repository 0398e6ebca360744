//! OHLC candle as delivered by the venue's history endpoint.

use crate::domain::Decimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single candle. Only completed candles participate in indicator math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub time: DateTime<Utc>,
    pub is_complete: bool,
}

impl Candle {
    /// Convenience constructor for a completed candle.
    pub fn complete(
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        time: DateTime<Utc>,
    ) -> Self {
        Candle {
            open,
            high,
            low,
            close,
            time,
            is_complete: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_complete_constructor() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let d = |s: &str| Decimal::from_str_canonical(s).unwrap();
        let c = Candle::complete(d("100"), d("105"), d("99"), d("103"), t);
        assert!(c.is_complete);
        assert_eq!(c.high, d("105"));
    }
}
