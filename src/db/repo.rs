//! Repository layer for database operations.

use crate::domain::{
    AccountId, Decimal, Direction, IndicatorSnapshot, InstrumentId, InstrumentState,
    PortfolioDiff, PositionState, Ticker,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Repository for database operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Insert or refresh a tracked instrument and its indicator levels.
    ///
    /// The notify gate is deliberately left alone on conflict: refreshing
    /// indicators must not re-arm an instrument that already fired today.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_instrument(&self, state: &InstrumentState) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO instruments (
                instrument_id, ticker, tracked, notify_armed,
                donchian_long_55, donchian_short_55, donchian_long_20, donchian_short_20,
                atr14, indicators_updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(instrument_id) DO UPDATE SET
                ticker = excluded.ticker,
                tracked = excluded.tracked,
                donchian_long_55 = excluded.donchian_long_55,
                donchian_short_55 = excluded.donchian_short_55,
                donchian_long_20 = excluded.donchian_long_20,
                donchian_short_20 = excluded.donchian_short_20,
                atr14 = excluded.atr14,
                indicators_updated_at = excluded.indicators_updated_at
            "#,
        )
        .bind(state.instrument_id.as_str())
        .bind(state.ticker.as_str())
        .bind(state.tracked)
        .bind(state.notify_armed)
        .bind(state.indicators.donchian_long_55.map(|d| d.to_canonical_string()))
        .bind(state.indicators.donchian_short_55.map(|d| d.to_canonical_string()))
        .bind(state.indicators.donchian_long_20.map(|d| d.to_canonical_string()))
        .bind(state.indicators.donchian_short_20.map(|d| d.to_canonical_string()))
        .bind(state.indicators.atr14.map(|d| d.to_canonical_string()))
        .bind(state.indicators.computed_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load one instrument, `None` if it was never onboarded.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_instrument(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Option<InstrumentState>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT instrument_id, ticker, tracked, notify_armed,
                   donchian_long_55, donchian_short_55, donchian_long_20, donchian_short_20,
                   atr14, indicators_updated_at
            FROM instruments
            WHERE instrument_id = ?
            "#,
        )
        .bind(instrument_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(instrument_from_row))
    }

    /// Load one instrument together with the account's position in it.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_instrument_with_position(
        &self,
        account_id: &AccountId,
        instrument_id: &InstrumentId,
    ) -> Result<Option<(InstrumentState, Option<PositionState>)>, sqlx::Error> {
        let Some(instrument) = self.get_instrument(instrument_id).await? else {
            return Ok(None);
        };
        let position = self.get_position(account_id, instrument_id).await?;
        Ok(Some((instrument, position)))
    }

    /// Load one stored position.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_position(
        &self,
        account_id: &AccountId,
        instrument_id: &InstrumentId,
    ) -> Result<Option<PositionState>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT account_id, instrument_id, direction, lots, unit_size
            FROM positions
            WHERE account_id = ? AND instrument_id = ?
            "#,
        )
        .bind(account_id.as_str())
        .bind(instrument_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(position_from_row))
    }

    /// All stored positions for one account, keyed by instrument id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_positions(
        &self,
        account_id: &AccountId,
    ) -> Result<BTreeMap<InstrumentId, PositionState>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, instrument_id, direction, lots, unit_size
            FROM positions
            WHERE account_id = ?
            ORDER BY instrument_id ASC
            "#,
        )
        .bind(account_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let position = position_from_row(row);
                (position.instrument_id.clone(), position)
            })
            .collect())
    }

    /// Ids of all instruments that still participate in threshold checks.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_tracked_instrument_ids(&self) -> Result<Vec<InstrumentId>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT instrument_id FROM instruments WHERE tracked = 1 ORDER BY instrument_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| InstrumentId::new(row.get::<String, _>("instrument_id")))
            .collect())
    }

    /// Flip the notify gate to disarmed, but only if it is currently armed.
    ///
    /// Returns true exactly once per armed period; the conditional UPDATE is
    /// what makes the notify-once guarantee hold under concurrent ticks.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn disarm(&self, instrument_id: &InstrumentId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE instruments SET notify_armed = 0 WHERE instrument_id = ? AND notify_armed = 1",
        )
        .bind(instrument_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Re-arm every instrument; run by the daily scheduler. Returns the
    /// number of instruments that were disarmed.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn rearm_all(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE instruments SET notify_armed = 1 WHERE notify_armed = 0")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Apply a reconciliation diff in a single transaction: upsert added and
    /// changed positions, delete removed ones, and untrack instruments no
    /// account holds anymore.
    ///
    /// # Errors
    /// Returns an error if any statement fails; nothing is applied then.
    pub async fn apply_portfolio_diff(
        &self,
        account_id: &AccountId,
        diff: &PortfolioDiff,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now_ms = Utc::now().timestamp_millis();

        for position in diff.added.iter().chain(diff.changed.iter().map(|(_, n)| n)) {
            sqlx::query(
                r#"
                INSERT INTO positions (account_id, instrument_id, direction, lots, unit_size, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(account_id, instrument_id) DO UPDATE SET
                    direction = excluded.direction,
                    lots = excluded.lots,
                    unit_size = excluded.unit_size,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(account_id.as_str())
            .bind(position.instrument_id.as_str())
            .bind(position.direction.as_str())
            .bind(position.lots)
            .bind(position.unit_size)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }

        for position in &diff.removed {
            sqlx::query("DELETE FROM positions WHERE account_id = ? AND instrument_id = ?")
                .bind(account_id.as_str())
                .bind(position.instrument_id.as_str())
                .execute(&mut *tx)
                .await?;

            // Another account may still hold the instrument.
            sqlx::query(
                r#"
                UPDATE instruments SET tracked = 0
                WHERE instrument_id = ?
                  AND NOT EXISTS (SELECT 1 FROM positions WHERE instrument_id = ?)
                "#,
            )
            .bind(position.instrument_id.as_str())
            .bind(position.instrument_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn instrument_from_row(row: &SqliteRow) -> InstrumentState {
    let computed_at = row
        .get::<Option<i64>, _>("indicators_updated_at")
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(DateTime::UNIX_EPOCH);

    InstrumentState {
        instrument_id: InstrumentId::new(row.get::<String, _>("instrument_id")),
        ticker: Ticker::new(row.get::<String, _>("ticker")),
        tracked: row.get::<i64, _>("tracked") != 0,
        notify_armed: row.get::<i64, _>("notify_armed") != 0,
        indicators: IndicatorSnapshot {
            donchian_long_55: decimal_column(row, "donchian_long_55"),
            donchian_short_55: decimal_column(row, "donchian_short_55"),
            donchian_long_20: decimal_column(row, "donchian_long_20"),
            donchian_short_20: decimal_column(row, "donchian_short_20"),
            atr14: decimal_column(row, "atr14"),
            computed_at,
        },
    }
}

fn position_from_row(row: &SqliteRow) -> PositionState {
    let direction: String = row.get("direction");
    PositionState {
        account_id: AccountId::new(row.get::<String, _>("account_id")),
        instrument_id: InstrumentId::new(row.get::<String, _>("instrument_id")),
        direction: Direction::parse(&direction),
        lots: row.get("lots"),
        unit_size: row.get("unit_size"),
    }
}

fn decimal_column(row: &SqliteRow, column: &str) -> Option<Decimal> {
    row.get::<Option<String>, _>(column)
        .and_then(|s| Decimal::from_str(&s).ok())
}
