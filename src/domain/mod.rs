//! Domain types for the breakout notifier.
//!
//! This module provides:
//! - Lossless numeric handling via a Decimal wrapper
//! - Domain primitives: InstrumentId, AccountId, Ticker, Direction
//! - Candle / indicator / position state records
//! - The VenueEvent tagged union produced at the ingestion boundary

pub mod candle;
pub mod decimal;
pub mod event;
pub mod instrument;
pub mod position;
pub mod primitives;

pub use candle::Candle;
pub use decimal::Decimal;
pub use event::{LastPrice, PortfolioSnapshot, SnapshotPosition, TradeTick, VenueEvent};
pub use instrument::{IndicatorSnapshot, InstrumentState};
pub use position::{PortfolioDiff, PositionState};
pub use primitives::{AccountId, Direction, InstrumentId, Ticker};
