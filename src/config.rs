use crate::stream::BackoffPolicy;
use chrono::{FixedOffset, Offset};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub venue_api_url: String,
    pub chat_id: i64,
    pub account_id: String,
    /// Notifications go to this webhook; logged locally when unset.
    pub notify_webhook_url: Option<String>,
    pub bus_capacity: usize,
    pub backoff_start_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_grace_ms: u64,
    pub candle_fetch_concurrency: usize,
    pub poll_interval_ms: u64,
    /// UTC offset of the venue's trading calendar, used for indicator
    /// freshness checks.
    pub venue_utc_offset_hours: i32,
    /// Cash pseudo-instrument excluded from position tracking.
    pub cash_instrument_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = require(&env_map, "DATABASE_PATH")?;
        let venue_api_url = require(&env_map, "VENUE_API_URL")?;
        let chat_id = require(&env_map, "CHAT_ID")?
            .parse::<i64>()
            .map_err(|_| {
                ConfigError::InvalidValue("CHAT_ID".to_string(), "must be a valid i64".to_string())
            })?;
        let account_id = require(&env_map, "ACCOUNT_ID")?;

        let notify_webhook_url = env_map.get("NOTIFY_WEBHOOK_URL").cloned();
        let cash_instrument_id = env_map.get("CASH_INSTRUMENT_ID").cloned();

        let bus_capacity = parse_or(&env_map, "BUS_CAPACITY", 10_000usize)?;
        let backoff_start_ms = parse_or(&env_map, "BACKOFF_START_MS", 1_000u64)?;
        let backoff_cap_ms = parse_or(&env_map, "BACKOFF_CAP_MS", 60_000u64)?;
        let backoff_grace_ms = parse_or(&env_map, "BACKOFF_GRACE_MS", 30_000u64)?;
        let candle_fetch_concurrency = parse_or(&env_map, "CANDLE_FETCH_CONCURRENCY", 16usize)?;
        let poll_interval_ms = parse_or(&env_map, "POLL_INTERVAL_MS", 1_000u64)?;
        let venue_utc_offset_hours = parse_or(&env_map, "VENUE_UTC_OFFSET_HOURS", 3i32)?;

        if venue_utc_offset_hours.abs() > 14 {
            return Err(ConfigError::InvalidValue(
                "VENUE_UTC_OFFSET_HOURS".to_string(),
                "must be within -14..=14".to_string(),
            ));
        }

        Ok(Config {
            database_path,
            venue_api_url,
            chat_id,
            account_id,
            notify_webhook_url,
            bus_capacity,
            backoff_start_ms,
            backoff_cap_ms,
            backoff_grace_ms,
            candle_fetch_concurrency,
            poll_interval_ms,
            venue_utc_offset_hours,
            cash_instrument_id,
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            start: Duration::from_millis(self.backoff_start_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
            grace: Duration::from_millis(self.backoff_grace_ms),
        }
    }

    pub fn venue_tz(&self) -> FixedOffset {
        // Validated to a sane range in from_env_map.
        FixedOffset::east_opt(self.venue_utc_offset_hours * 3600)
            .unwrap_or_else(|| chrono::Utc.fix())
    }
}

fn require(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(
                key.to_string(),
                format!("could not parse {:?}", raw),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert(
            "VENUE_API_URL".to_string(),
            "https://venue.example".to_string(),
        );
        map.insert("CHAT_ID".to_string(), "42".to_string());
        map.insert("ACCOUNT_ID".to_string(), "acc-1".to_string());
        map
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.bus_capacity, 10_000);
        assert_eq!(config.backoff_start_ms, 1_000);
        assert_eq!(config.backoff_cap_ms, 60_000);
        assert_eq!(config.candle_fetch_concurrency, 16);
        assert_eq!(config.venue_utc_offset_hours, 3);
        assert!(config.notify_webhook_url.is_none());
        assert!(config.cash_instrument_id.is_none());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_account_id() {
        let mut env_map = setup_required_env();
        env_map.remove("ACCOUNT_ID");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "ACCOUNT_ID"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_chat_id() {
        let mut env_map = setup_required_env();
        env_map.insert("CHAT_ID".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "CHAT_ID"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_backoff() {
        let mut env_map = setup_required_env();
        env_map.insert("BACKOFF_START_MS".to_string(), "soon".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "BACKOFF_START_MS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_out_of_range_utc_offset() {
        let mut env_map = setup_required_env();
        env_map.insert("VENUE_UTC_OFFSET_HOURS".to_string(), "30".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "VENUE_UTC_OFFSET_HOURS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_backoff_policy_conversion() {
        let mut env_map = setup_required_env();
        env_map.insert("BACKOFF_START_MS".to_string(), "500".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        let policy = config.backoff();
        assert_eq!(policy.start, Duration::from_millis(500));
        assert_eq!(policy.cap, Duration::from_secs(60));
    }
}
