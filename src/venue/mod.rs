//! Venue client abstractions.
//!
//! The core never touches the venue wire protocol; it consumes these traits.
//! `VenueStream`/`VenueConnection` cover the push side (long-lived event
//! streams), `VenueQuery` the request/response side (candle history,
//! instrument metadata, portfolio reads).

use crate::domain::{
    AccountId, Candle, Decimal, InstrumentId, LastPrice, PortfolioSnapshot, Ticker, VenueEvent,
};
use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod rest;

pub use mock::MockVenue;
pub use rest::RestVenueClient;

/// Error type for venue operations.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    /// Network error (connection refused, timeout, DNS failure).
    #[error("network error: {0}")]
    Network(String),
    /// HTTP-level error from the venue gateway.
    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },
    /// Malformed or unexpected payload shape.
    #[error("parse error: {0}")]
    Parse(String),
    /// Rate limit exceeded; retried upstream with backoff.
    #[error("rate limited")]
    RateLimited,
    /// The live stream dropped.
    #[error("stream error: {0}")]
    Stream(String),
}

/// The logical streams the venue exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    MarketData,
    Portfolio,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::MarketData => write!(f, "market_data"),
            StreamKind::Portfolio => write!(f, "portfolio"),
        }
    }
}

/// Per-instrument subscription topics within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriptionTopic {
    LastPrice,
}

impl std::fmt::Display for SubscriptionTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionTopic::LastPrice => write!(f, "last_price"),
        }
    }
}

/// Factory for live stream connections.
#[async_trait]
pub trait VenueStream: Send + Sync {
    /// Open a fresh connection for the given stream kind.
    async fn connect(&self, kind: StreamKind) -> Result<Box<dyn VenueConnection>, VenueError>;
}

/// One live stream connection. Dropped on any error; the supervisor
/// reconnects and replays subscriptions.
#[async_trait]
pub trait VenueConnection: Send {
    async fn subscribe(
        &mut self,
        topic: SubscriptionTopic,
        instrument_ids: &[InstrumentId],
    ) -> Result<(), VenueError>;

    async fn unsubscribe(
        &mut self,
        topic: SubscriptionTopic,
        instrument_ids: &[InstrumentId],
    ) -> Result<(), VenueError>;

    /// Await the next event. `Ok(None)` signals an orderly close.
    async fn next_event(&mut self) -> Result<Option<VenueEvent>, VenueError>;
}

/// Static instrument metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentInfo {
    pub ticker: Ticker,
    pub name: String,
    /// Venue instrument kind, e.g. "share" or "futures".
    pub kind: String,
}

/// Request/response venue API.
#[async_trait]
pub trait VenueQuery: Send + Sync {
    /// Daily candle history deep enough for the slow Donchian window
    /// (roughly two months).
    async fn daily_candles(&self, instrument_id: &InstrumentId)
        -> Result<Vec<Candle>, VenueError>;

    /// Static metadata for one instrument, `None` if the venue doesn't know it.
    async fn instrument_info(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Option<InstrumentInfo>, VenueError>;

    /// Ruble value of one price step, defined for derivatives only.
    async fn price_point(&self, instrument_id: &InstrumentId)
        -> Result<Option<Decimal>, VenueError>;

    /// Current last prices for a set of instruments.
    async fn last_prices(
        &self,
        instrument_ids: &[InstrumentId],
    ) -> Result<Vec<LastPrice>, VenueError>;

    /// Current portfolio snapshot for an account.
    async fn portfolio(&self, account_id: &AccountId) -> Result<PortfolioSnapshot, VenueError>;
}
