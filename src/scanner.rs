use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::ScraperConfig;
use crate::cookies::CookieJar;
use crate::events::EventBus;
use crate::models::MonitoredLink;
use crate::price_store::PriceStore;
use crate::registry::LinkRegistry;
use crate::scraper::{Extraction, Extractor};
use crate::web::protocol::ServerEvent;
use crate::Result;

/// Tally of one completed scan cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub checked: usize,
    pub changed: usize,
    pub challenged: usize,
    pub unavailable: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle holds the scan lock; this trigger was dropped.
    Skipped,
    /// Registry was empty, nothing to do.
    Idle,
    Completed(CycleStats),
}

/// Bounded-concurrency scan pipeline. One cycle walks the registry's
/// current url set in sequential chunks of at most K concurrent sessions;
/// the global scan lock keeps cycles mutually exclusive.
pub struct Scanner {
    registry: Arc<LinkRegistry>,
    prices: Arc<PriceStore>,
    extractor: Arc<dyn Extractor>,
    events: EventBus,
    jar: CookieJar,
    config: ScraperConfig,
    cycle_lock: Mutex<()>,
}

impl Scanner {
    pub fn new(
        registry: Arc<LinkRegistry>,
        prices: Arc<PriceStore>,
        extractor: Arc<dyn Extractor>,
        events: EventBus,
        jar: CookieJar,
        config: ScraperConfig,
    ) -> Self {
        Self {
            registry,
            prices,
            extractor,
            events,
            jar,
            config,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one full scan cycle. A trigger arriving while a cycle is in
    /// flight is dropped, not queued.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let _guard = match self.cycle_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("scan cycle already in progress, dropping trigger");
                return Ok(CycleOutcome::Skipped);
            }
        };

        let links = self.registry.snapshot().await;
        if links.is_empty() {
            info!("no links to scan");
            return Ok(CycleOutcome::Idle);
        }

        self.extractor.prepare().await?;

        let chunk_size = self.config.max_concurrent_pages.max(1);
        let mut stats = CycleStats::default();

        info!(urls = links.len(), chunk_size, "scan cycle started");

        for (index, chunk) in links.chunks(chunk_size).enumerate() {
            if index > 0 {
                self.pause_between_chunks().await;
            }
            self.run_chunk(chunk, &mut stats).await;
        }

        self.maybe_clear_jar();

        info!(
            checked = stats.checked,
            changed = stats.changed,
            challenged = stats.challenged,
            unavailable = stats.unavailable,
            "scan cycle finished"
        );
        Ok(CycleOutcome::Completed(stats))
    }

    /// Fire a cycle in the background; overlap is absorbed by the scan
    /// lock and failures only get logged.
    pub fn spawn_cycle(self: &Arc<Self>) {
        let scanner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = scanner.run_cycle().await {
                error!(%err, "scan cycle failed");
            }
        });
    }

    async fn run_chunk(&self, chunk: &[MonitoredLink], stats: &mut CycleStats) {
        let sessions = chunk.iter().map(|link| async move {
            let extraction = self.extractor.extract(&link.url).await;
            (link, extraction)
        });

        for (link, extraction) in join_all(sessions).await {
            stats.checked += 1;
            match extraction {
                Extraction::Listing(listing) => {
                    if self
                        .prices
                        .apply(&link.url, link.role, &listing)
                        .await
                        .is_some()
                    {
                        stats.changed += 1;
                    }
                }
                Extraction::ChallengeDetected => {
                    stats.challenged += 1;
                    self.events
                        .publish(ServerEvent::captcha_detected(link.url.clone()));
                }
                Extraction::Unavailable => {
                    stats.unavailable += 1;
                    warn!(url = %link.url, "listing unavailable this cycle");
                }
            }
        }
    }

    async fn pause_between_chunks(&self) {
        let secs = {
            let mut rng = rand::thread_rng();
            let min = self.config.chunk_pause_min_secs;
            let max = self.config.chunk_pause_max_secs;
            if max > min {
                rng.gen_range(min..=max)
            } else {
                min
            }
        };
        if secs > 0 {
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
    }

    // Shedding the jar now and then keeps the fingerprint from going stale.
    fn maybe_clear_jar(&self) {
        let clear = rand::thread_rng().gen_bool(self.config.jar_clear_probability);
        if clear {
            self.jar.clear();
        }
    }
}
