//! Scripted mock venue for tests.
//!
//! Implements both the stream and query traits: connect attempts can be made
//! to fail, each successful connection replays a scripted event sequence, and
//! every subscribe call is recorded with its connection ordinal so tests can
//! assert replay-before-new-subscribes ordering.

use super::{
    InstrumentInfo, StreamKind, SubscriptionTopic, VenueConnection, VenueError, VenueQuery,
    VenueStream,
};
use crate::domain::{
    AccountId, Candle, Decimal, InstrumentId, LastPrice, PortfolioSnapshot, VenueEvent,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded subscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeCall {
    /// 1-based ordinal of the connection the call was issued on.
    pub connection: u32,
    pub topic: SubscriptionTopic,
    pub instrument_ids: Vec<InstrumentId>,
}

/// What a mock connection does once its script is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterScript {
    /// Idle until the supervisor cancels the task.
    Idle,
    /// Fail the stream, forcing a reconnect.
    Drop,
}

#[derive(Default)]
struct Inner {
    connect_failures: u32,
    connect_count: u32,
    connections: u32,
    scripts: VecDeque<(Vec<VenueEvent>, AfterScript)>,
    subscribe_log: Vec<SubscribeCall>,
    candles: HashMap<InstrumentId, Vec<Candle>>,
    infos: HashMap<InstrumentId, InstrumentInfo>,
    price_points: HashMap<InstrumentId, Decimal>,
    last_prices: HashMap<InstrumentId, LastPrice>,
    portfolios: VecDeque<PortfolioSnapshot>,
    candle_fetch_log: Vec<InstrumentId>,
}

/// Mock venue with builder-style setup.
#[derive(Clone, Default)]
pub struct MockVenue {
    inner: Arc<Mutex<Inner>>,
}

impl MockVenue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the first `n` connect attempts fail.
    pub fn with_connect_failures(self, n: u32) -> Self {
        self.inner.lock().unwrap().connect_failures = n;
        self
    }

    /// Queue an event script; each successful connect consumes the next one.
    /// A connection whose script runs out idles until cancelled.
    pub fn with_script(self, events: Vec<VenueEvent>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .push_back((events, AfterScript::Idle));
        self
    }

    /// Like [`with_script`](Self::with_script), but the connection fails once
    /// the script is exhausted, forcing the caller to reconnect.
    pub fn with_script_then_drop(self, events: Vec<VenueEvent>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .push_back((events, AfterScript::Drop));
        self
    }

    pub fn with_candles(self, instrument_id: InstrumentId, candles: Vec<Candle>) -> Self {
        self.inner.lock().unwrap().candles.insert(instrument_id, candles);
        self
    }

    pub fn with_info(self, instrument_id: InstrumentId, info: InstrumentInfo) -> Self {
        self.inner.lock().unwrap().infos.insert(instrument_id, info);
        self
    }

    pub fn with_price_point(self, instrument_id: InstrumentId, value: Decimal) -> Self {
        self.inner
            .lock()
            .unwrap()
            .price_points
            .insert(instrument_id, value);
        self
    }

    pub fn with_last_price(self, price: LastPrice) -> Self {
        self.inner
            .lock()
            .unwrap()
            .last_prices
            .insert(price.instrument_id.clone(), price);
        self
    }

    pub fn with_portfolio(self, snapshot: PortfolioSnapshot) -> Self {
        self.inner.lock().unwrap().portfolios.push_back(snapshot);
        self
    }

    /// All subscribe calls recorded so far, across connections.
    pub fn subscribe_log(&self) -> Vec<SubscribeCall> {
        self.inner.lock().unwrap().subscribe_log.clone()
    }

    /// Instrument ids whose candle history was fetched, in call order.
    pub fn candle_fetch_log(&self) -> Vec<InstrumentId> {
        self.inner.lock().unwrap().candle_fetch_log.clone()
    }

    /// Number of connect attempts (failed and successful).
    pub fn connect_count(&self) -> u32 {
        self.inner.lock().unwrap().connect_count
    }
}

#[async_trait]
impl VenueStream for MockVenue {
    async fn connect(&self, _kind: StreamKind) -> Result<Box<dyn VenueConnection>, VenueError> {
        let (ordinal, script, after) = {
            let mut inner = self.inner.lock().unwrap();
            inner.connect_count += 1;
            if inner.connect_count <= inner.connect_failures {
                return Err(VenueError::Network("scripted connect failure".to_string()));
            }
            inner.connections += 1;
            let (script, after) = inner.scripts.pop_front().unwrap_or((Vec::new(), AfterScript::Idle));
            (inner.connections, script, after)
        };
        Ok(Box::new(MockConnection {
            inner: Arc::clone(&self.inner),
            ordinal,
            script: script.into(),
            after,
        }))
    }
}

struct MockConnection {
    inner: Arc<Mutex<Inner>>,
    ordinal: u32,
    script: VecDeque<VenueEvent>,
    after: AfterScript,
}

#[async_trait]
impl VenueConnection for MockConnection {
    async fn subscribe(
        &mut self,
        topic: SubscriptionTopic,
        instrument_ids: &[InstrumentId],
    ) -> Result<(), VenueError> {
        self.inner.lock().unwrap().subscribe_log.push(SubscribeCall {
            connection: self.ordinal,
            topic,
            instrument_ids: instrument_ids.to_vec(),
        });
        Ok(())
    }

    async fn unsubscribe(
        &mut self,
        _topic: SubscriptionTopic,
        _instrument_ids: &[InstrumentId],
    ) -> Result<(), VenueError> {
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<VenueEvent>, VenueError> {
        if let Some(event) = self.script.pop_front() {
            // Yield so sequential scripted events do not starve the caller's
            // select loop of command processing.
            tokio::task::yield_now().await;
            return Ok(Some(event));
        }
        match self.after {
            AfterScript::Drop => Err(VenueError::Stream("scripted stream drop".to_string())),
            AfterScript::Idle => {
                // Idle until the supervisor cancels us.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Some(VenueEvent::Ping))
            }
        }
    }
}

#[async_trait]
impl VenueQuery for MockVenue {
    async fn daily_candles(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Vec<Candle>, VenueError> {
        let mut inner = self.inner.lock().unwrap();
        inner.candle_fetch_log.push(instrument_id.clone());
        Ok(inner.candles.get(instrument_id).cloned().unwrap_or_default())
    }

    async fn instrument_info(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Option<InstrumentInfo>, VenueError> {
        Ok(self.inner.lock().unwrap().infos.get(instrument_id).cloned())
    }

    async fn price_point(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Option<Decimal>, VenueError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .price_points
            .get(instrument_id)
            .copied())
    }

    async fn last_prices(
        &self,
        instrument_ids: &[InstrumentId],
    ) -> Result<Vec<LastPrice>, VenueError> {
        let inner = self.inner.lock().unwrap();
        Ok(instrument_ids
            .iter()
            .filter_map(|id| inner.last_prices.get(id).cloned())
            .collect())
    }

    async fn portfolio(&self, account_id: &AccountId) -> Result<PortfolioSnapshot, VenueError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .portfolios
            .pop_front()
            .filter(|s| &s.account_id == account_id)
            .ok_or_else(|| VenueError::Stream("no portfolio scripted".to_string()))
    }
}
