use breakwatch::bus::{EventBus, QueuePolicy, Topic};
use breakwatch::cache::{NameService, PriceCache};
use breakwatch::config::Config;
use breakwatch::db::{init_db, Repository};
use breakwatch::domain::{AccountId, InstrumentId};
use breakwatch::error::AppError;
use breakwatch::handlers::{MarketDataHandler, PortfolioReconciler};
use breakwatch::notify::{LogNotifier, Notifier, WebhookNotifier};
use breakwatch::stream::StreamSupervisor;
use breakwatch::venue::{RestVenueClient, StreamKind, SubscriptionTopic, VenueQuery, VenueStream};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let pool = init_db(&config.database_path).await?;
    let repo = Repository::new(pool);

    let account_id = AccountId::new(config.account_id.clone());
    let client = Arc::new(RestVenueClient::new(
        config.venue_api_url.clone(),
        account_id.clone(),
        Duration::from_millis(config.poll_interval_ms),
    ));
    let venue_query: Arc<dyn VenueQuery> = client.clone();
    let venue_stream: Arc<dyn VenueStream> = client;

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let prices = Arc::new(PriceCache::new());
    let names = Arc::new(NameService::new(Arc::clone(&venue_query)));

    // Raw ticks may be shed under pressure; portfolio snapshots may not.
    let bus = Arc::new(
        EventBus::new(config.bus_capacity)
            .with_policy(Topic::MarketData, QueuePolicy::DropWithLog)
            .with_policy(Topic::Portfolio, QueuePolicy::Block),
    );

    // Resume last-price subscriptions for everything tracked before the
    // crash/restart, then spawn the stream loops.
    let tracked = repo.list_tracked_instrument_ids().await?;
    tracing::info!(instruments = tracked.len(), "resuming tracked subscriptions");

    let market_data = Arc::new(
        StreamSupervisor::new(
            StreamKind::MarketData,
            Topic::MarketData,
            Arc::clone(&venue_stream),
            Arc::clone(&bus),
            config.backoff(),
        )
        .with_initial(SubscriptionTopic::LastPrice, &tracked)
        .spawn(),
    );

    bus.subscribe(
        Topic::MarketData,
        Arc::new(MarketDataHandler::new(
            account_id.clone(),
            config.chat_id,
            repo.clone(),
            Arc::clone(&prices),
            Arc::clone(&notifier),
        )),
    );
    bus.subscribe(
        Topic::Portfolio,
        Arc::new(
            PortfolioReconciler::new(
                config.chat_id,
                repo.clone(),
                Arc::clone(&venue_query),
                Arc::clone(&names),
                Arc::clone(&notifier),
                config.cash_instrument_id.clone().map(InstrumentId::new),
                config.venue_tz(),
                config.candle_fetch_concurrency,
            )
            .with_subscriptions(Arc::clone(&market_data)),
        ),
    );
    bus.start();

    let portfolio = StreamSupervisor::new(
        StreamKind::Portfolio,
        Topic::Portfolio,
        venue_stream,
        Arc::clone(&bus),
        config.backoff(),
    )
    .spawn();

    tracing::info!("breakwatch running");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }

    // Cooperative shutdown: streams first, then drain the bus.
    tracing::info!("shutting down");
    market_data.stop().await;
    portfolio.stop().await;
    bus.stop().await;

    Ok(())
}
