pub mod bus;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod indicators;
pub mod notify;
pub mod stream;
pub mod venue;

pub use bus::{EventBus, EventHandler, QueuePolicy, Topic};
pub use cache::{NameService, PriceCache};
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    AccountId, Candle, Decimal, Direction, IndicatorSnapshot, InstrumentId, InstrumentState,
    LastPrice, PortfolioDiff, PortfolioSnapshot, PositionState, Ticker, VenueEvent,
};
pub use error::AppError;
pub use handlers::{MarketDataHandler, PortfolioReconciler};
pub use notify::{LogNotifier, Notifier, RecordingNotifier, WebhookNotifier};
pub use stream::{BackoffPolicy, StreamSupervisor, SupervisorHandle};
pub use venue::{MockVenue, RestVenueClient, StreamKind, SubscriptionTopic, VenueQuery, VenueStream};
