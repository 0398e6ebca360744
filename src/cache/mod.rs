//! In-process caches: last-price memoization and instrument name lookup.

use crate::domain::{InstrumentId, LastPrice, Ticker};
use crate::venue::{VenueError, VenueQuery};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Latest observed price per instrument, guarded by the tick timestamp so
/// out-of-order deliveries never roll a price backwards.
#[derive(Default)]
pub struct PriceCache {
    inner: RwLock<HashMap<InstrumentId, LastPrice>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the tick unless an equal-or-newer one is already cached.
    /// Returns true when the tick was accepted.
    pub async fn set_if_newer(&self, price: LastPrice) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get(&price.instrument_id) {
            Some(existing) if existing.time >= price.time => {
                debug!(
                    instrument_id = price.instrument_id.as_str(),
                    "stale tick ignored"
                );
                false
            }
            _ => {
                inner.insert(price.instrument_id.clone(), price);
                true
            }
        }
    }

    pub async fn get(&self, instrument_id: &InstrumentId) -> Option<LastPrice> {
        self.inner.read().await.get(instrument_id).cloned()
    }
}

/// Read-through ticker lookup: cache first, then the venue, backfilling the
/// cache on a hit. Unknown instruments resolve to `None` and are retried on
/// the next lookup.
pub struct NameService {
    venue: Arc<dyn VenueQuery>,
    cache: RwLock<HashMap<InstrumentId, Ticker>>,
}

impl NameService {
    pub fn new(venue: Arc<dyn VenueQuery>) -> Self {
        Self {
            venue,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn ticker(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<Option<Ticker>, VenueError> {
        if let Some(ticker) = self.cache.read().await.get(instrument_id) {
            return Ok(Some(ticker.clone()));
        }

        let Some(info) = self.venue.instrument_info(instrument_id).await? else {
            return Ok(None);
        };

        self.cache
            .write()
            .await
            .insert(instrument_id.clone(), info.ticker.clone());
        Ok(Some(info.ticker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decimal;
    use crate::venue::{InstrumentInfo, MockVenue};
    use chrono::{TimeZone, Utc};

    fn tick(instrument: &str, price: i64, secs: i64) -> LastPrice {
        LastPrice {
            instrument_id: InstrumentId::new(instrument),
            price: Decimal::from(price),
            time: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_set_if_newer_accepts_fresh_rejects_stale() {
        let cache = PriceCache::new();

        assert!(cache.set_if_newer(tick("A", 100, 10)).await);
        assert!(!cache.set_if_newer(tick("A", 99, 5)).await);
        assert!(!cache.set_if_newer(tick("A", 98, 10)).await);
        assert!(cache.set_if_newer(tick("A", 101, 11)).await);

        let stored = cache.get(&InstrumentId::new("A")).await.unwrap();
        assert_eq!(stored.price, Decimal::from(101));
    }

    #[tokio::test]
    async fn test_instruments_are_independent() {
        let cache = PriceCache::new();
        assert!(cache.set_if_newer(tick("A", 100, 10)).await);
        assert!(cache.set_if_newer(tick("B", 50, 5)).await);
    }

    #[tokio::test]
    async fn test_name_service_reads_through_and_caches() {
        let venue = MockVenue::new().with_info(
            InstrumentId::new("A"),
            InstrumentInfo {
                ticker: Ticker::new("ABCD"),
                name: "Abcd Futures".to_string(),
                kind: "futures".to_string(),
            },
        );
        let names = NameService::new(Arc::new(venue));

        let first = names.ticker(&InstrumentId::new("A")).await.unwrap();
        assert_eq!(first, Some(Ticker::new("ABCD")));

        // Second lookup is served from the cache.
        let second = names.ticker(&InstrumentId::new("A")).await.unwrap();
        assert_eq!(second, Some(Ticker::new("ABCD")));
    }

    #[tokio::test]
    async fn test_name_service_unknown_instrument() {
        let names = NameService::new(Arc::new(MockVenue::new()));
        let result = names.ticker(&InstrumentId::new("missing")).await.unwrap();
        assert!(result.is_none());
    }
}
