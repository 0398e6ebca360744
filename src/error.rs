use thiserror::Error;

/// Startup/wiring errors. Runtime failures inside the handlers stay inside
/// the bus dispatch loop and never surface here.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Venue error: {0}")]
    Venue(#[from] crate::venue::VenueError),
}
