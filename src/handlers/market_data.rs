//! Last-price threshold checks and notify-once debounce.

use crate::bus::EventHandler;
use crate::cache::PriceCache;
use crate::db::Repository;
use crate::domain::{Direction, LastPrice, VenueEvent};
use crate::notify::{messages, Notifier};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Compares each accepted tick against the instrument's stored Donchian
/// bounds. With an open position the 20-day channel is the stop level; with
/// no position the 55-day channel is the breakout level. All comparisons are
/// closed-interval: a boundary touch counts as a crossing.
pub struct MarketDataHandler {
    account_id: crate::domain::AccountId,
    chat_id: i64,
    repo: Repository,
    prices: Arc<PriceCache>,
    notifier: Arc<dyn Notifier>,
}

impl MarketDataHandler {
    pub fn new(
        account_id: crate::domain::AccountId,
        chat_id: i64,
        repo: Repository,
        prices: Arc<PriceCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            account_id,
            chat_id,
            repo,
            prices,
            notifier,
        }
    }

    async fn on_last_price(&self, tick: &LastPrice) -> anyhow::Result<()> {
        // Out-of-order ticks must not trigger decisions on stale prices.
        if !self.prices.set_if_newer(tick.clone()).await {
            return Ok(());
        }

        let Some((instrument, position)) = self
            .repo
            .get_instrument_with_position(&self.account_id, &tick.instrument_id)
            .await?
        else {
            debug!(
                instrument_id = tick.instrument_id.as_str(),
                "tick for unknown instrument"
            );
            return Ok(());
        };

        if !instrument.tracked || !instrument.notify_armed {
            return Ok(());
        }

        let price = tick.price;
        let ticker = instrument.ticker.as_str();
        let bounds = &instrument.indicators;

        // Undefined bounds (history too short) mean no decision is possible.
        let text = match position.as_ref().map(|p| p.direction) {
            Some(Direction::Long) => bounds
                .donchian_short_20
                .filter(|bound| price <= *bound)
                .map(|bound| messages::stop_long(ticker, price, bound)),
            Some(Direction::Short) => bounds
                .donchian_long_20
                .filter(|bound| price >= *bound)
                .map(|bound| messages::stop_short(ticker, price, bound)),
            Some(Direction::Unknown) => None,
            None => {
                if let Some(bound) = bounds.donchian_long_55.filter(|bound| price >= *bound) {
                    Some(messages::breakout_long(ticker, price, bound))
                } else {
                    bounds
                        .donchian_short_55
                        .filter(|bound| price <= *bound)
                        .map(|bound| messages::breakout_short(ticker, price, bound))
                }
            }
        };

        if let Some(text) = text {
            // Disarm before sending: a crash in between costs at most one
            // missed cycle, never a double notification.
            if self.repo.disarm(&tick.instrument_id).await? {
                info!(instrument_id = tick.instrument_id.as_str(), %text, "threshold crossed");
                self.notifier.send(self.chat_id, &text).await;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for MarketDataHandler {
    fn name(&self) -> &'static str {
        "market_data"
    }

    async fn handle(&self, event: &VenueEvent) -> anyhow::Result<()> {
        match event {
            VenueEvent::LastPrice(tick) => self.on_last_price(tick).await,
            VenueEvent::SubscriptionAck { instrument_ids } => {
                info!(instruments = instrument_ids.len(), "subscription confirmed");
                Ok(())
            }
            VenueEvent::Candle { .. } | VenueEvent::Trade(_) => {
                debug!(kind = event.kind(), "ignoring market event");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::{
        AccountId, Decimal, IndicatorSnapshot, InstrumentId, InstrumentState, PortfolioDiff,
        PositionState, Ticker,
    };
    use crate::notify::RecordingNotifier;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;
    use tempfile::TempDir;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            donchian_long_55: Some(dec("110")),
            donchian_short_55: Some(dec("90")),
            donchian_long_20: Some(dec("105")),
            donchian_short_20: Some(dec("101")),
            atr14: Some(dec("2")),
            computed_at: Utc::now(),
        }
    }

    async fn setup() -> (MarketDataHandler, Repository, Arc<RecordingNotifier>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Repository::new(pool);
        let notifier = Arc::new(RecordingNotifier::new());
        let handler = MarketDataHandler::new(
            AccountId::new("acc-1"),
            42,
            repo.clone(),
            Arc::new(PriceCache::new()),
            notifier.clone(),
        );
        (handler, repo, notifier, temp_dir)
    }

    async fn seed_instrument(repo: &Repository, indicators: IndicatorSnapshot) {
        repo.upsert_instrument(&InstrumentState {
            instrument_id: InstrumentId::new("A"),
            ticker: Ticker::new("ABCD"),
            tracked: true,
            notify_armed: true,
            indicators,
        })
        .await
        .unwrap();
    }

    async fn seed_position(repo: &Repository, direction: Direction, lots: i64) {
        let diff = PortfolioDiff {
            added: vec![PositionState {
                account_id: AccountId::new("acc-1"),
                instrument_id: InstrumentId::new("A"),
                direction,
                lots,
                unit_size: None,
            }],
            ..Default::default()
        };
        repo.apply_portfolio_diff(&AccountId::new("acc-1"), &diff)
            .await
            .unwrap();
    }

    fn tick(price: &str, secs: i64) -> VenueEvent {
        VenueEvent::LastPrice(LastPrice {
            instrument_id: InstrumentId::new("A"),
            price: dec(price),
            time: Utc.timestamp_opt(secs, 0).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_long_position_stop_fires_exactly_once() {
        let (handler, repo, notifier, _temp) = setup().await;
        seed_instrument(&repo, snapshot()).await;
        seed_position(&repo, Direction::Long, 2).await;

        handler.handle(&tick("100", 10)).await.unwrap();
        handler.handle(&tick("100", 11)).await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 42);
        assert!(sent[0].1.starts_with("[STOP LONG]"));

        let state = repo
            .get_instrument(&InstrumentId::new("A"))
            .await
            .unwrap()
            .unwrap();
        assert!(!state.notify_armed);
    }

    #[tokio::test]
    async fn test_boundary_touch_counts_as_crossing() {
        let (handler, repo, notifier, _temp) = setup().await;
        seed_instrument(&repo, snapshot()).await;
        seed_position(&repo, Direction::Long, 2).await;

        handler.handle(&tick("101", 10)).await.unwrap();
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_short_position_stop() {
        let (handler, repo, notifier, _temp) = setup().await;
        seed_instrument(&repo, snapshot()).await;
        seed_position(&repo, Direction::Short, -1).await;

        handler.handle(&tick("106", 10)).await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("[STOP SHORT]"));
    }

    #[tokio::test]
    async fn test_no_position_breakouts_use_slow_channel() {
        let (handler, repo, notifier, _temp) = setup().await;
        seed_instrument(&repo, snapshot()).await;

        // Inside the 55-day channel: nothing, even though 106 is past the
        // 20-day high.
        handler.handle(&tick("106", 10)).await.unwrap();
        assert!(notifier.sent().is_empty());

        handler.handle(&tick("111", 11)).await.unwrap();
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("[BREAKOUT LONG]"));
    }

    #[tokio::test]
    async fn test_short_breakout() {
        let (handler, repo, notifier, _temp) = setup().await;
        seed_instrument(&repo, snapshot()).await;

        handler.handle(&tick("89", 10)).await.unwrap();
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("[BREAKOUT SHORT]"));
    }

    #[tokio::test]
    async fn test_undefined_bound_is_no_decision() {
        let (handler, repo, notifier, _temp) = setup().await;
        let mut indicators = snapshot();
        indicators.donchian_short_20 = None;
        seed_instrument(&repo, indicators).await;
        seed_position(&repo, Direction::Long, 2).await;

        handler.handle(&tick("50", 10)).await.unwrap();
        assert!(notifier.sent().is_empty());

        // And the gate stays armed for when the bound appears.
        let state = repo
            .get_instrument(&InstrumentId::new("A"))
            .await
            .unwrap()
            .unwrap();
        assert!(state.notify_armed);
    }

    #[tokio::test]
    async fn test_untracked_and_unknown_instruments_ignored() {
        let (handler, repo, notifier, _temp) = setup().await;

        // Unknown instrument.
        handler.handle(&tick("100", 10)).await.unwrap();

        // Tracked = false.
        repo.upsert_instrument(&InstrumentState {
            instrument_id: InstrumentId::new("A"),
            ticker: Ticker::new("ABCD"),
            tracked: false,
            notify_armed: true,
            indicators: snapshot(),
        })
        .await
        .unwrap();
        handler.handle(&tick("100", 11)).await.unwrap();

        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stale_tick_does_not_notify() {
        let (handler, repo, notifier, _temp) = setup().await;
        seed_instrument(&repo, snapshot()).await;
        seed_position(&repo, Direction::Long, 2).await;

        // A safe price arrives first, then an older crossing tick.
        handler.handle(&tick("104", 20)).await.unwrap();
        handler.handle(&tick("100", 10)).await.unwrap();

        assert!(notifier.sent().is_empty());
    }
}
