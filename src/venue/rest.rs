//! REST venue gateway client.
//!
//! Request/response calls retry transient failures with exponential backoff.
//! The gateway has no push transport, so the `VenueStream` implementation
//! polls on a fixed interval; poll failures surface as connection errors and
//! go through the supervisor's reconnect path like any stream drop.

use super::{
    InstrumentInfo, StreamKind, SubscriptionTopic, VenueConnection, VenueError, VenueQuery,
    VenueStream,
};
use crate::domain::{
    AccountId, Candle, Decimal, InstrumentId, LastPrice, PortfolioSnapshot, SnapshotPosition,
    Ticker, VenueEvent,
};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Client for the venue's JSON gateway.
#[derive(Debug)]
pub struct RestVenueClient {
    client: Client,
    base_url: String,
    account_id: AccountId,
    poll_interval: Duration,
}

impl RestVenueClient {
    pub fn new(base_url: String, account_id: AccountId, poll_interval: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url,
            account_id,
            poll_interval,
        }
    }

    async fn post_json(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, VenueError> {
        let url = format!("{}/{}", self.base_url, path);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(VenueError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(VenueError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(VenueError::Http {
                    status: status.as_u16(),
                    message: "server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(VenueError::Http {
                    status: status.as_u16(),
                    message: "client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(VenueError::Parse(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl VenueQuery for RestVenueClient {
    async fn daily_candles(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Vec<Candle>, VenueError> {
        debug!(instrument_id = %instrument_id, "fetching daily candles");
        let payload = serde_json::json!({
            "instrument_id": instrument_id.as_str(),
            "interval": "day",
            "days": 60,
        });
        let response = self.post_json("candles", payload).await?;

        let items = response
            .get("candles")
            .and_then(|v| v.as_array())
            .ok_or_else(|| VenueError::Parse("expected candles array".to_string()))?;

        let mut candles = Vec::with_capacity(items.len());
        for item in items {
            match parse_candle(item) {
                Ok(candle) => candles.push(candle),
                Err(e) => warn!(instrument_id = %instrument_id, error = %e, "skipping malformed candle"),
            }
        }
        Ok(candles)
    }

    async fn instrument_info(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Option<InstrumentInfo>, VenueError> {
        let payload = serde_json::json!({ "instrument_id": instrument_id.as_str() });
        let response = match self.post_json("instrument", payload).await {
            Ok(r) => r,
            Err(VenueError::Http { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let ticker = response
            .get("ticker")
            .and_then(|v| v.as_str())
            .ok_or_else(|| VenueError::Parse("missing ticker field".to_string()))?;
        let name = response
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(ticker);
        let kind = response
            .get("kind")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        Ok(Some(InstrumentInfo {
            ticker: Ticker::new(ticker),
            name: name.to_string(),
            kind: kind.to_string(),
        }))
    }

    async fn price_point(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Option<Decimal>, VenueError> {
        let payload = serde_json::json!({ "instrument_id": instrument_id.as_str() });
        let response = match self.post_json("futures_margin", payload).await {
            Ok(r) => r,
            Err(VenueError::Http { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let increment = response
            .get("min_price_increment")
            .and_then(|v| v.as_str())
            .map(parse_decimal)
            .transpose()?;
        let amount = response
            .get("min_price_increment_amount")
            .and_then(|v| v.as_str())
            .map(parse_decimal)
            .transpose()?;

        match (increment, amount) {
            (Some(inc), Some(amt)) if !inc.is_zero() => Ok(Some(amt / inc)),
            _ => Ok(None),
        }
    }

    async fn last_prices(
        &self,
        instrument_ids: &[InstrumentId],
    ) -> Result<Vec<LastPrice>, VenueError> {
        let ids: Vec<&str> = instrument_ids.iter().map(|i| i.as_str()).collect();
        let payload = serde_json::json!({ "instrument_ids": ids });
        let response = self.post_json("last_prices", payload).await?;

        let items = response
            .get("prices")
            .and_then(|v| v.as_array())
            .ok_or_else(|| VenueError::Parse("expected prices array".to_string()))?;

        let mut prices = Vec::with_capacity(items.len());
        for item in items {
            match parse_last_price(item) {
                Ok(lp) => prices.push(lp),
                Err(e) => warn!(error = %e, "skipping malformed last price"),
            }
        }
        Ok(prices)
    }

    async fn portfolio(&self, account_id: &AccountId) -> Result<PortfolioSnapshot, VenueError> {
        let payload = serde_json::json!({ "account_id": account_id.as_str() });
        let response = self.post_json("portfolio", payload).await?;
        parse_portfolio(&response, account_id)
    }
}

#[async_trait]
impl VenueStream for RestVenueClient {
    async fn connect(&self, kind: StreamKind) -> Result<Box<dyn VenueConnection>, VenueError> {
        // Probe the gateway so a dead endpoint fails the connect attempt
        // instead of the first poll.
        match kind {
            StreamKind::MarketData => {
                self.last_prices(&[]).await?;
            }
            StreamKind::Portfolio => {
                self.portfolio(&self.account_id).await?;
            }
        }
        Ok(Box::new(PollingConnection {
            client: Arc::new(self.clone_shallow()),
            kind,
            account_id: self.account_id.clone(),
            interval: self.poll_interval,
            subscribed: BTreeSet::new(),
            pending: VecDeque::new(),
        }))
    }
}

impl RestVenueClient {
    fn clone_shallow(&self) -> RestVenueClient {
        RestVenueClient {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            account_id: self.account_id.clone(),
            poll_interval: self.poll_interval,
        }
    }
}

/// Interval-polling stand-in for a push stream.
struct PollingConnection {
    client: Arc<RestVenueClient>,
    kind: StreamKind,
    account_id: AccountId,
    interval: Duration,
    subscribed: BTreeSet<InstrumentId>,
    pending: VecDeque<VenueEvent>,
}

#[async_trait]
impl VenueConnection for PollingConnection {
    async fn subscribe(
        &mut self,
        _topic: SubscriptionTopic,
        instrument_ids: &[InstrumentId],
    ) -> Result<(), VenueError> {
        self.subscribed.extend(instrument_ids.iter().cloned());
        self.pending.push_back(VenueEvent::SubscriptionAck {
            instrument_ids: instrument_ids.to_vec(),
        });
        Ok(())
    }

    async fn unsubscribe(
        &mut self,
        _topic: SubscriptionTopic,
        instrument_ids: &[InstrumentId],
    ) -> Result<(), VenueError> {
        for id in instrument_ids {
            self.subscribed.remove(id);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<VenueEvent>, VenueError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        tokio::time::sleep(self.interval).await;
        match self.kind {
            StreamKind::MarketData => {
                if self.subscribed.is_empty() {
                    return Ok(Some(VenueEvent::Ping));
                }
                let ids: Vec<InstrumentId> = self.subscribed.iter().cloned().collect();
                let prices = self.client.last_prices(&ids).await?;
                self.pending
                    .extend(prices.into_iter().map(VenueEvent::LastPrice));
                Ok(Some(self.pending.pop_front().unwrap_or(VenueEvent::Ping)))
            }
            StreamKind::Portfolio => {
                let snapshot = self.client.portfolio(&self.account_id).await?;
                Ok(Some(VenueEvent::Portfolio(snapshot)))
            }
        }
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, VenueError> {
    Decimal::from_str_canonical(s).map_err(|e| VenueError::Parse(format!("invalid decimal: {e}")))
}

fn parse_time_ms(value: &serde_json::Value, field: &str) -> Result<DateTime<Utc>, VenueError> {
    let ms = value
        .get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| VenueError::Parse(format!("missing {field} field")))?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| VenueError::Parse(format!("{field} out of range: {ms}")))
}

fn parse_str_field(value: &serde_json::Value, field: &str) -> Result<String, VenueError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| VenueError::Parse(format!("missing {field} field")))
}

fn parse_candle(value: &serde_json::Value) -> Result<Candle, VenueError> {
    Ok(Candle {
        open: parse_decimal(&parse_str_field(value, "open")?)?,
        high: parse_decimal(&parse_str_field(value, "high")?)?,
        low: parse_decimal(&parse_str_field(value, "low")?)?,
        close: parse_decimal(&parse_str_field(value, "close")?)?,
        time: parse_time_ms(value, "time_ms")?,
        is_complete: value
            .get("is_complete")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

fn parse_last_price(value: &serde_json::Value) -> Result<LastPrice, VenueError> {
    Ok(LastPrice {
        instrument_id: InstrumentId::new(parse_str_field(value, "instrument_id")?),
        price: parse_decimal(&parse_str_field(value, "price")?)?,
        time: parse_time_ms(value, "time_ms")?,
    })
}

fn parse_portfolio(
    value: &serde_json::Value,
    account_id: &AccountId,
) -> Result<PortfolioSnapshot, VenueError> {
    let items = value
        .get("positions")
        .and_then(|v| v.as_array())
        .ok_or_else(|| VenueError::Parse("expected positions array".to_string()))?;

    let mut positions = Vec::with_capacity(items.len());
    for item in items {
        let instrument_id = InstrumentId::new(parse_str_field(item, "instrument_id")?);
        let lots = item
            .get("lots")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| VenueError::Parse("missing lots field".to_string()))?;
        positions.push(SnapshotPosition {
            instrument_id,
            lots,
        });
    }

    Ok(PortfolioSnapshot {
        account_id: account_id.clone(),
        positions,
        total_amount: parse_decimal(&parse_str_field(value, "total_amount")?)?,
        expected_yield_percent: parse_decimal(&parse_str_field(value, "expected_yield_percent")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candle_valid() {
        let value = serde_json::json!({
            "open": "100.5", "high": "103", "low": "99.25", "close": "102",
            "time_ms": 1_700_000_000_000i64, "is_complete": true
        });
        let candle = parse_candle(&value).unwrap();
        assert_eq!(candle.high, Decimal::from_str_canonical("103").unwrap());
        assert!(candle.is_complete);
    }

    #[test]
    fn test_parse_candle_missing_field() {
        let value = serde_json::json!({ "open": "100", "high": "101" });
        assert!(parse_candle(&value).is_err());
    }

    #[test]
    fn test_parse_candle_defaults_to_incomplete() {
        let value = serde_json::json!({
            "open": "1", "high": "1", "low": "1", "close": "1",
            "time_ms": 0i64
        });
        assert!(!parse_candle(&value).unwrap().is_complete);
    }

    #[test]
    fn test_parse_last_price_valid() {
        let value = serde_json::json!({
            "instrument_id": "uid-1", "price": "250.75", "time_ms": 1_700_000_000_000i64
        });
        let lp = parse_last_price(&value).unwrap();
        assert_eq!(lp.instrument_id, InstrumentId::new("uid-1"));
        assert_eq!(lp.price, Decimal::from_str_canonical("250.75").unwrap());
    }

    #[test]
    fn test_parse_portfolio_valid() {
        let value = serde_json::json!({
            "total_amount": "100000",
            "expected_yield_percent": "2.5",
            "positions": [
                { "instrument_id": "uid-1", "lots": 3 },
                { "instrument_id": "uid-2", "lots": -1 }
            ]
        });
        let snapshot = parse_portfolio(&value, &AccountId::new("acc-1")).unwrap();
        assert_eq!(snapshot.positions.len(), 2);
        assert_eq!(snapshot.positions[1].lots, -1);
    }
}
