//! Typed venue events.
//!
//! The event kind is decided once, at the ingestion boundary, when the raw
//! venue payload is parsed; everything downstream dispatches on the variant.

use crate::domain::{AccountId, Candle, Decimal, InstrumentId};
use chrono::{DateTime, Utc};

/// A last-traded-price tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastPrice {
    pub instrument_id: InstrumentId,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

/// An anonymized trade print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeTick {
    pub instrument_id: InstrumentId,
    pub price: Decimal,
    pub quantity: i64,
    pub time: DateTime<Utc>,
}

/// One position inside a portfolio snapshot. Lots are signed; direction is
/// derived from the sign during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPosition {
    pub instrument_id: InstrumentId,
    pub lots: i64,
}

/// A full portfolio snapshot for one account. The venue always sends the
/// complete position set, so an empty `positions` means full liquidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioSnapshot {
    pub account_id: AccountId,
    pub positions: Vec<SnapshotPosition>,
    pub total_amount: Decimal,
    pub expected_yield_percent: Decimal,
}

/// Everything a venue stream can deliver, as one tagged union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueEvent {
    LastPrice(LastPrice),
    Candle {
        instrument_id: InstrumentId,
        candle: Candle,
    },
    Trade(TradeTick),
    /// The venue confirmed a set of last-price subscriptions.
    SubscriptionAck {
        instrument_ids: Vec<InstrumentId>,
    },
    Portfolio(PortfolioSnapshot),
    Ping,
}

impl VenueEvent {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VenueEvent::LastPrice(_) => "last_price",
            VenueEvent::Candle { .. } => "candle",
            VenueEvent::Trade(_) => "trade",
            VenueEvent::SubscriptionAck { .. } => "subscription_ack",
            VenueEvent::Portfolio(_) => "portfolio",
            VenueEvent::Ping => "ping",
        }
    }
}
