//! Portfolio snapshot reconciliation.

use crate::bus::EventHandler;
use crate::cache::NameService;
use crate::db::Repository;
use crate::domain::{
    Decimal, Direction, InstrumentId, InstrumentState, PortfolioDiff, PortfolioSnapshot,
    PositionState, Ticker, VenueEvent,
};
use crate::handlers::sizing::contracts_for;
use crate::indicators::compute_snapshot;
use crate::notify::{messages, Notifier};
use crate::stream::SupervisorHandle;
use crate::venue::{SubscriptionTopic, VenueError, VenueQuery};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Reconciles each portfolio snapshot against the stored position set.
///
/// Every pass: onboard unseen or stale instruments (candle fetch, indicator
/// compute, upsert), diff the snapshot against stored positions, persist the
/// diff in one transaction, then summarize it to the notification sink. A
/// failed pass drops the snapshot; the next one supersedes it.
pub struct PortfolioReconciler {
    chat_id: i64,
    repo: Repository,
    venue: Arc<dyn VenueQuery>,
    names: Arc<NameService>,
    notifier: Arc<dyn Notifier>,
    /// Pseudo-instrument for account cash, excluded from tracking.
    cash_instrument_id: Option<InstrumentId>,
    venue_tz: FixedOffset,
    candle_fetch_concurrency: usize,
    /// Market-data stream control, for keeping last-price subscriptions in
    /// step with the position set.
    subscriptions: Option<Arc<SupervisorHandle>>,
    /// Serializes passes per account; different accounts may run in parallel.
    locks: Mutex<HashMap<crate::domain::AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PortfolioReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chat_id: i64,
        repo: Repository,
        venue: Arc<dyn VenueQuery>,
        names: Arc<NameService>,
        notifier: Arc<dyn Notifier>,
        cash_instrument_id: Option<InstrumentId>,
        venue_tz: FixedOffset,
        candle_fetch_concurrency: usize,
    ) -> Self {
        Self {
            chat_id,
            repo,
            venue,
            names,
            notifier,
            cash_instrument_id,
            venue_tz,
            candle_fetch_concurrency: candle_fetch_concurrency.max(1),
            subscriptions: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Keep the market-data stream's last-price subscriptions in sync with
    /// reconciled positions.
    pub fn with_subscriptions(mut self, handle: Arc<SupervisorHandle>) -> Self {
        self.subscriptions = Some(handle);
        self
    }

    async fn on_portfolio(&self, snapshot: &PortfolioSnapshot) -> anyhow::Result<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(snapshot.account_id.clone()).or_default())
        };
        let _guard = lock.lock().await;

        let ids: Vec<InstrumentId> = snapshot
            .positions
            .iter()
            .filter(|p| Some(&p.instrument_id) != self.cash_instrument_id.as_ref())
            .map(|p| p.instrument_id.clone())
            .collect();

        let now = Utc::now();
        let atr_map = self.ensure_indicators(&ids, now).await?;
        let old = self.repo.list_positions(&snapshot.account_id).await?;
        let new = self.build_positions(snapshot, &atr_map).await?;

        let diff = PortfolioDiff::between(&old, &new);
        if diff.is_empty() {
            debug!(account_id = snapshot.account_id.as_str(), "portfolio unchanged");
            return Ok(());
        }

        self.repo
            .apply_portfolio_diff(&snapshot.account_id, &diff)
            .await?;
        info!(
            account_id = snapshot.account_id.as_str(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "portfolio reconciled"
        );

        self.sync_subscriptions(&diff).await;
        self.notify_changes(&diff).await;
        Ok(())
    }

    async fn sync_subscriptions(&self, diff: &PortfolioDiff) {
        let Some(handle) = &self.subscriptions else {
            return;
        };
        let added: Vec<InstrumentId> = diff
            .added
            .iter()
            .map(|p| p.instrument_id.clone())
            .collect();
        if !added.is_empty() {
            handle.subscribe(SubscriptionTopic::LastPrice, added).await;
        }
        let removed: Vec<InstrumentId> = diff
            .removed
            .iter()
            .map(|p| p.instrument_id.clone())
            .collect();
        if !removed.is_empty() {
            handle
                .unsubscribe(SubscriptionTopic::LastPrice, removed)
                .await;
        }
    }

    /// Make sure every instrument in the snapshot has indicators computed for
    /// the current trading day, returning each one's ATR (None when the
    /// history was too short). Candle fetches run concurrently, capped.
    async fn ensure_indicators(
        &self,
        ids: &[InstrumentId],
        now: DateTime<Utc>,
    ) -> anyhow::Result<HashMap<InstrumentId, Option<Decimal>>> {
        let mut atr_map = HashMap::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.repo.get_instrument(id).await? {
                Some(state) if state.indicators.is_fresh(now, self.venue_tz) => {
                    atr_map.insert(id.clone(), state.indicators.atr14);
                }
                _ => missing.push(id.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(atr_map);
        }

        let fetched: Vec<_> = stream::iter(missing.into_iter().map(|id| {
            let venue = Arc::clone(&self.venue);
            async move {
                let candles = venue.daily_candles(&id).await?;
                let info = venue.instrument_info(&id).await?;
                Ok::<_, VenueError>((id, candles, info))
            }
        }))
        .buffer_unordered(self.candle_fetch_concurrency)
        .collect()
        .await;

        for result in fetched {
            let (id, candles, info) = result?;
            let indicators = compute_snapshot(&candles, now);
            if indicators.atr14.is_none() {
                warn!(
                    instrument_id = id.as_str(),
                    candles = candles.len(),
                    "history too short for indicators"
                );
            }
            atr_map.insert(id.clone(), indicators.atr14);

            let ticker = info
                .map(|i| i.ticker)
                .unwrap_or_else(|| Ticker::new(id.as_str()));
            self.repo
                .upsert_instrument(&InstrumentState {
                    instrument_id: id,
                    ticker,
                    tracked: true,
                    notify_armed: true,
                    indicators,
                })
                .await?;
        }
        Ok(atr_map)
    }

    async fn build_positions(
        &self,
        snapshot: &PortfolioSnapshot,
        atr_map: &HashMap<InstrumentId, Option<Decimal>>,
    ) -> anyhow::Result<BTreeMap<InstrumentId, PositionState>> {
        let mut positions = BTreeMap::new();
        for raw in &snapshot.positions {
            if Some(&raw.instrument_id) == self.cash_instrument_id.as_ref() {
                continue;
            }

            let unit_size = match atr_map.get(&raw.instrument_id).copied().flatten() {
                Some(atr) => {
                    let price_point = self
                        .venue
                        .price_point(&raw.instrument_id)
                        .await?
                        .unwrap_or_else(|| Decimal::from(1));
                    Some(contracts_for(
                        snapshot.total_amount,
                        snapshot.expected_yield_percent,
                        atr,
                        price_point,
                    ))
                }
                None => None,
            };

            positions.insert(
                raw.instrument_id.clone(),
                PositionState {
                    account_id: snapshot.account_id.clone(),
                    instrument_id: raw.instrument_id.clone(),
                    direction: Direction::from_lots(raw.lots),
                    lots: raw.lots,
                    unit_size,
                },
            );
        }
        Ok(positions)
    }

    /// Best-effort summary send; the diff is already persisted at this point.
    async fn notify_changes(&self, diff: &PortfolioDiff) {
        let mut added = Vec::with_capacity(diff.added.len());
        for position in &diff.added {
            added.push((self.display_name(&position.instrument_id).await, position.clone()));
        }

        let mut removed = Vec::with_capacity(diff.removed.len());
        for position in &diff.removed {
            removed.push(self.display_name(&position.instrument_id).await);
        }

        let mut changed = Vec::with_capacity(diff.changed.len());
        for (old, new) in &diff.changed {
            changed.push((
                self.display_name(&new.instrument_id).await,
                old.clone(),
                new.clone(),
            ));
        }

        let text = messages::portfolio_summary(&added, &removed, &changed);
        self.notifier.send(self.chat_id, &text).await;
    }

    async fn display_name(&self, instrument_id: &InstrumentId) -> String {
        match self.names.ticker(instrument_id).await {
            Ok(Some(ticker)) => ticker.as_str().to_string(),
            Ok(None) => instrument_id.as_str().to_string(),
            Err(err) => {
                warn!(instrument_id = instrument_id.as_str(), error = %err, "name lookup failed");
                instrument_id.as_str().to_string()
            }
        }
    }
}

#[async_trait]
impl EventHandler for PortfolioReconciler {
    fn name(&self) -> &'static str {
        "portfolio_reconciler"
    }

    async fn handle(&self, event: &VenueEvent) -> anyhow::Result<()> {
        match event {
            VenueEvent::Portfolio(snapshot) => self.on_portfolio(snapshot).await,
            _ => Ok(()),
        }
    }
}
