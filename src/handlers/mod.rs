//! Bus subscribers: the per-tick decision path and the snapshot reconciler.

pub mod market_data;
pub mod portfolio;
pub mod sizing;

pub use market_data::MarketDataHandler;
pub use portfolio::PortfolioReconciler;
