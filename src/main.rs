use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use argus_monitor::behavior::default_pipeline;
use argus_monitor::config::AppConfig;
use argus_monitor::cookies::CookieJar;
use argus_monitor::events::EventBus;
use argus_monitor::price_store::PriceStore;
use argus_monitor::registry::LinkRegistry;
use argus_monitor::scanner::Scanner;
use argus_monitor::scheduler::ScanScheduler;
use argus_monitor::scraper::ChromeExtractor;
use argus_monitor::store::SqliteStore;
use argus_monitor::web::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argus_monitor=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!(
        cron = %config.scheduler.cron,
        timezone = %config.scheduler.timezone,
        "starting argus-monitor"
    );

    let store = Arc::new(
        SqliteStore::connect(&config.database.url, config.database.max_connections).await?,
    );

    let events = EventBus::default();
    let registry = Arc::new(LinkRegistry::new(
        store.clone(),
        &config.scraper.marketplace_prefix,
    ));
    let restored = registry.hydrate().await?;
    info!(links = restored, "link registry hydrated");

    let prices = Arc::new(PriceStore::new(store.clone(), events.clone()));
    let jar = CookieJar::new(&config.scraper.cookie_jar_path);
    let extractor = Arc::new(ChromeExtractor::new(
        config.scraper.clone(),
        jar.clone(),
        default_pipeline(),
    ));

    let scanner = Arc::new(Scanner::new(
        registry.clone(),
        prices.clone(),
        extractor,
        events.clone(),
        jar,
        config.scraper.clone(),
    ));

    // Catch up on anything persisted from a previous run before the first
    // scheduled firing.
    if !registry.is_empty().await {
        scanner.spawn_cycle();
    }

    let mut scheduler = ScanScheduler::new(scanner.clone(), &config.scheduler).await?;
    scheduler.start().await?;

    let state = AppState {
        registry,
        prices,
        scanner,
        events,
    };

    tokio::select! {
        result = web::serve(&config.server, state) => {
            if let Err(err) = result {
                error!(%err, "web server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    if let Err(err) = scheduler.shutdown().await {
        warn!(%err, "scheduler shutdown failed");
    }

    Ok(())
}
