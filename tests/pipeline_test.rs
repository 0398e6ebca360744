//! End-to-end pipeline tests: scripted venue -> stream supervisor -> bus ->
//! handlers -> notification sink.

use breakwatch::bus::{EventBus, QueuePolicy, Topic};
use breakwatch::cache::{NameService, PriceCache};
use breakwatch::db::{init_db, Repository};
use breakwatch::domain::{
    AccountId, Decimal, Direction, IndicatorSnapshot, InstrumentId, InstrumentState, LastPrice,
    PortfolioDiff, PortfolioSnapshot, PositionState, SnapshotPosition, Ticker, VenueEvent,
};
use breakwatch::handlers::{MarketDataHandler, PortfolioReconciler};
use breakwatch::notify::RecordingNotifier;
use breakwatch::stream::{BackoffPolicy, StreamSupervisor};
use breakwatch::venue::{InstrumentInfo, MockVenue, StreamKind, SubscriptionTopic, VenueQuery};
use chrono::{Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        start: Duration::from_millis(20),
        cap: Duration::from_millis(100),
        grace: Duration::from_secs(5),
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 3s");
}

async fn setup_test_db() -> (Repository, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (Repository::new(pool), temp_dir)
}

fn indicators() -> IndicatorSnapshot {
    IndicatorSnapshot {
        donchian_long_55: Some(dec("110")),
        donchian_short_55: Some(dec("90")),
        donchian_long_20: Some(dec("105")),
        donchian_short_20: Some(dec("101")),
        atr14: Some(dec("2")),
        computed_at: Utc::now(),
    }
}

async fn seed_long_position(repo: &Repository) {
    repo.upsert_instrument(&InstrumentState {
        instrument_id: InstrumentId::new("A"),
        ticker: Ticker::new("ABCD"),
        tracked: true,
        notify_armed: true,
        indicators: indicators(),
    })
    .await
    .unwrap();

    let diff = PortfolioDiff {
        added: vec![PositionState {
            account_id: AccountId::new("acc-1"),
            instrument_id: InstrumentId::new("A"),
            direction: Direction::Long,
            lots: 2,
            unit_size: None,
        }],
        ..Default::default()
    };
    repo.apply_portfolio_diff(&AccountId::new("acc-1"), &diff)
        .await
        .unwrap();
}

fn stop_tick(secs_offset: i64) -> VenueEvent {
    VenueEvent::LastPrice(LastPrice {
        instrument_id: InstrumentId::new("A"),
        price: dec("100"),
        time: Utc::now() + ChronoDuration::seconds(secs_offset),
    })
}

/// A crossing tick produces exactly one notification, and the gate holds
/// across a stream drop and reconnect: the replayed subscription delivers a
/// second crossing tick that must stay silent.
#[tokio::test]
async fn test_stop_long_fires_once_across_reconnect() {
    let (repo, _temp) = setup_test_db().await;
    seed_long_position(&repo).await;

    let venue = MockVenue::new()
        .with_script_then_drop(vec![stop_tick(0)])
        .with_script(vec![stop_tick(1)]);

    let notifier = Arc::new(RecordingNotifier::new());
    let bus = Arc::new(EventBus::new(64));
    bus.subscribe(
        Topic::MarketData,
        Arc::new(MarketDataHandler::new(
            AccountId::new("acc-1"),
            42,
            repo.clone(),
            Arc::new(PriceCache::new()),
            notifier.clone(),
        )),
    );
    bus.start();

    let handle = StreamSupervisor::new(
        StreamKind::MarketData,
        Topic::MarketData,
        Arc::new(venue.clone()),
        Arc::clone(&bus),
        fast_backoff(),
    )
    .with_initial(SubscriptionTopic::LastPrice, &[InstrumentId::new("A")])
    .spawn();

    // Both connections must have replayed the subscription and delivered
    // their tick before we judge the notification count.
    wait_until(|| venue.subscribe_log().len() >= 2).await;
    wait_until(|| !notifier.sent().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1, "notify-once must hold across reconnects");
    assert!(sent[0].1.starts_with("[STOP LONG]"));

    let state = repo
        .get_instrument(&InstrumentId::new("A"))
        .await
        .unwrap()
        .unwrap();
    assert!(!state.notify_armed);

    let log = venue.subscribe_log();
    assert_eq!(log[0].connection, 1);
    assert_eq!(log[1].connection, 2);
    assert_eq!(log[1].instrument_ids, vec![InstrumentId::new("A")]);

    handle.stop().await;
    bus.stop().await;
}

/// A portfolio snapshot flowing over its own stream onboards the instrument,
/// persists the position, notifies, and subscribes the new instrument on the
/// market-data stream.
#[tokio::test]
async fn test_portfolio_snapshot_onboards_and_subscribes() {
    let (repo, _temp) = setup_test_db().await;

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let candles: Vec<_> = (0..60)
        .map(|i| {
            breakwatch::domain::Candle::complete(
                dec("100"),
                dec("101"),
                dec("99"),
                dec("100"),
                start + ChronoDuration::days(i),
            )
        })
        .collect();

    let snapshot = PortfolioSnapshot {
        account_id: AccountId::new("acc-1"),
        positions: vec![SnapshotPosition {
            instrument_id: InstrumentId::new("A"),
            lots: 2,
        }],
        total_amount: dec("100000"),
        expected_yield_percent: dec("0"),
    };

    let portfolio_venue = MockVenue::new()
        .with_candles(InstrumentId::new("A"), candles)
        .with_info(
            InstrumentId::new("A"),
            InstrumentInfo {
                ticker: Ticker::new("ABCD"),
                name: "Abcd Futures".to_string(),
                kind: "futures".to_string(),
            },
        )
        .with_script(vec![VenueEvent::Portfolio(snapshot)]);
    let market_venue = MockVenue::new();

    let notifier = Arc::new(RecordingNotifier::new());
    let bus = Arc::new(
        EventBus::new(64)
            .with_policy(Topic::MarketData, QueuePolicy::DropWithLog)
            .with_policy(Topic::Portfolio, QueuePolicy::Block),
    );

    let market_handle = Arc::new(
        StreamSupervisor::new(
            StreamKind::MarketData,
            Topic::MarketData,
            Arc::new(market_venue.clone()),
            Arc::clone(&bus),
            fast_backoff(),
        )
        .spawn(),
    );

    let venue_query: Arc<dyn VenueQuery> = Arc::new(portfolio_venue.clone());
    bus.subscribe(
        Topic::Portfolio,
        Arc::new(
            PortfolioReconciler::new(
                42,
                repo.clone(),
                Arc::clone(&venue_query),
                Arc::new(NameService::new(Arc::clone(&venue_query))),
                notifier.clone(),
                None,
                FixedOffset::east_opt(3 * 3600).unwrap(),
                4,
            )
            .with_subscriptions(Arc::clone(&market_handle)),
        ),
    );
    bus.start();

    let portfolio_handle = StreamSupervisor::new(
        StreamKind::Portfolio,
        Topic::Portfolio,
        Arc::new(portfolio_venue.clone()),
        Arc::clone(&bus),
        fast_backoff(),
    )
    .spawn();

    wait_until(|| !notifier.sent().is_empty()).await;
    wait_until(|| !market_venue.subscribe_log().is_empty()).await;

    let sent = notifier.sent();
    assert!(sent[0].1.contains("Opened:"));
    assert!(sent[0].1.contains("ABCD long 2 lots"));

    let positions = repo.list_positions(&AccountId::new("acc-1")).await.unwrap();
    assert_eq!(positions[&InstrumentId::new("A")].unit_size, Some(500));

    let log = market_venue.subscribe_log();
    assert_eq!(log[0].topic, SubscriptionTopic::LastPrice);
    assert_eq!(log[0].instrument_ids, vec![InstrumentId::new("A")]);

    market_handle.stop().await;
    portfolio_handle.stop().await;
    bus.stop().await;
}

/// Connect failures are retried and the stream comes up without losing the
/// desired subscription set.
#[tokio::test]
async fn test_stream_survives_initial_connect_failures() {
    let (repo, _temp) = setup_test_db().await;
    seed_long_position(&repo).await;

    let venue = MockVenue::new()
        .with_connect_failures(3)
        .with_script(vec![stop_tick(0)]);

    let notifier = Arc::new(RecordingNotifier::new());
    let bus = Arc::new(EventBus::new(64));
    bus.subscribe(
        Topic::MarketData,
        Arc::new(MarketDataHandler::new(
            AccountId::new("acc-1"),
            42,
            repo.clone(),
            Arc::new(PriceCache::new()),
            notifier.clone(),
        )),
    );
    bus.start();

    let handle = StreamSupervisor::new(
        StreamKind::MarketData,
        Topic::MarketData,
        Arc::new(venue.clone()),
        Arc::clone(&bus),
        fast_backoff(),
    )
    .with_initial(SubscriptionTopic::LastPrice, &[InstrumentId::new("A")])
    .spawn();

    wait_until(|| !notifier.sent().is_empty()).await;
    assert!(venue.connect_count() >= 4);
    assert!(notifier.sent()[0].1.starts_with("[STOP LONG]"));

    handle.stop().await;
    bus.stop().await;
}
