//! Human-facing notification text.

use crate::domain::{Decimal, PositionState};

pub fn breakout_long(ticker: &str, price: Decimal, threshold: Decimal) -> String {
    format!(
        "[BREAKOUT LONG] {}: price {} crossed above the 55-day high {}",
        ticker, price, threshold
    )
}

pub fn breakout_short(ticker: &str, price: Decimal, threshold: Decimal) -> String {
    format!(
        "[BREAKOUT SHORT] {}: price {} crossed below the 55-day low {}",
        ticker, price, threshold
    )
}

pub fn stop_long(ticker: &str, price: Decimal, threshold: Decimal) -> String {
    format!(
        "[STOP LONG] {}: price {} crossed below the 20-day low {}",
        ticker, price, threshold
    )
}

pub fn stop_short(ticker: &str, price: Decimal, threshold: Decimal) -> String {
    format!(
        "[STOP SHORT] {}: price {} crossed above the 20-day high {}",
        ticker, price, threshold
    )
}

/// Portfolio reconciliation summary. Names are resolved tickers (or raw ids
/// when the venue does not know the instrument); order follows the diff.
pub fn portfolio_summary(
    added: &[(String, PositionState)],
    removed: &[String],
    changed: &[(String, PositionState, PositionState)],
) -> String {
    let mut lines = vec!["Portfolio update:".to_string()];

    if !added.is_empty() {
        lines.push("Opened:".to_string());
        for (name, position) in added {
            let unit = position
                .unit_size
                .map(|u| format!(", unit {}", u))
                .unwrap_or_default();
            lines.push(format!(
                "  - {} {} {} lots{}",
                name,
                position.direction.as_str(),
                position.lots,
                unit
            ));
        }
    }

    if !removed.is_empty() {
        lines.push("Closed:".to_string());
        for name in removed {
            lines.push(format!("  - {}", name));
        }
    }

    if !changed.is_empty() {
        lines.push("Changed:".to_string());
        for (name, old, new) in changed {
            let mut parts = vec![format!("  - {}", name)];
            if old.direction != new.direction {
                parts.push(format!(
                    "direction: {} -> {}",
                    old.direction.as_str(),
                    new.direction.as_str()
                ));
            }
            if old.lots != new.lots {
                parts.push(format!("lots: {} -> {}", old.lots, new.lots));
            }
            lines.push(parts.join(" | "));
        }
    }

    lines.join("\n")
}
