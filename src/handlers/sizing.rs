//! ATR-based unit sizing.

use crate::domain::Decimal;

/// How many contracts one volatility unit buys for this account.
///
/// Unrealized profit is stripped out of the portfolio value first, so a
/// winning open position does not inflate the size of the next entry:
/// `floor((total - profit) / (atr * price_point * 100))`, never negative.
/// Returns 0 whenever ATR or the price point is undefined or non-positive.
pub fn contracts_for(
    total_amount: Decimal,
    expected_yield_percent: Decimal,
    atr: Decimal,
    price_point: Decimal,
) -> i64 {
    let denom = atr * price_point;
    if !denom.is_positive() {
        return 0;
    }

    let profit = if expected_yield_percent.is_positive() {
        let growth = Decimal::from(1) + expected_yield_percent / Decimal::from(100);
        let initial = total_amount / growth;
        (total_amount - initial).max(Decimal::zero())
    } else {
        Decimal::zero()
    };

    let units = (total_amount - profit) / (denom * Decimal::from(100));
    if !units.is_positive() {
        return 0;
    }
    units.floor_i64().unwrap_or(0)
}
