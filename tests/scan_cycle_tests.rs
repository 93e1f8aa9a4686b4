//! End-to-end cycles against scripted extraction outcomes: links go in
//! through the command layer, a scan runs, and events come out on the bus.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use argus_monitor::config::ScraperConfig;
use argus_monitor::cookies::CookieJar;
use argus_monitor::events::EventBus;
use argus_monitor::models::{Listing, LinkRole, MonitoredLink};
use argus_monitor::price_store::PriceStore;
use argus_monitor::registry::LinkRegistry;
use argus_monitor::scanner::{CycleOutcome, Scanner};
use argus_monitor::scraper::{Extraction, Extractor};
use argus_monitor::store::Storage;
use argus_monitor::web::gateway::handle_command;
use argus_monitor::web::protocol::{ClientCommand, LinkSpec, ServerEvent};
use argus_monitor::web::AppState;
use argus_monitor::Result;

const PREFIX: &str = "https://www.farpost.ru/";

fn url(n: u32) -> String {
    format!("{PREFIX}item/{n}")
}

fn listing(price: i64) -> Listing {
    Listing {
        store_name: "TechnoShop".to_string(),
        product_name: "iPhone 15".to_string(),
        price,
    }
}

/// In-memory store that records appended history rows.
#[derive(Default)]
struct RecordingStore {
    links: Mutex<HashMap<String, LinkRole>>,
    history: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl Storage for RecordingStore {
    async fn upsert_link(&self, url: &str, role: LinkRole) -> Result<()> {
        self.links.lock().unwrap().insert(url.to_string(), role);
        Ok(())
    }

    async fn delete_link(&self, url: &str) -> Result<()> {
        self.links.lock().unwrap().remove(url);
        Ok(())
    }

    async fn list_links(&self) -> Result<Vec<MonitoredLink>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .map(|(url, role)| MonitoredLink::new(url.clone(), *role))
            .collect())
    }

    async fn append_history(
        &self,
        url: &str,
        _store_name: &str,
        _product_name: &str,
        price: i64,
    ) -> Result<()> {
        self.history.lock().unwrap().push((url.to_string(), price));
        Ok(())
    }
}

/// Extractor whose outcomes are scripted per url and can be rewritten
/// between cycles.
#[derive(Default)]
struct ScriptedExtractor {
    outcomes: Mutex<HashMap<String, Extraction>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedExtractor {
    fn script(&self, url: &str, outcome: Extraction) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(url.to_string(), outcome);
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, url: &str) -> Extraction {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Extraction::Unavailable)
    }
}

struct Harness {
    state: AppState,
    store: Arc<RecordingStore>,
    extractor: Arc<ScriptedExtractor>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    harness_with_delay(None)
}

fn harness_with_delay(delay: Option<Duration>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordingStore::default());
    let extractor = Arc::new(ScriptedExtractor {
        delay,
        ..ScriptedExtractor::default()
    });
    let events = EventBus::new(64);
    let registry = Arc::new(LinkRegistry::new(store.clone(), PREFIX));
    let prices = Arc::new(PriceStore::new(store.clone(), events.clone()));
    let scanner = Arc::new(Scanner::new(
        registry.clone(),
        prices.clone(),
        extractor.clone(),
        events.clone(),
        CookieJar::new(dir.path().join("cookies.json")),
        ScraperConfig {
            marketplace_prefix: PREFIX.to_string(),
            max_concurrent_pages: 4,
            field_wait_secs: 1,
            nav_timeout_secs: 1,
            chunk_pause_min_secs: 0,
            chunk_pause_max_secs: 0,
            jar_clear_probability: 0.0,
            cookie_jar_path: "cookies.json".to_string(),
            behavior_time_scale: 0.0,
            chrome_path: None,
        },
    ));

    Harness {
        state: AppState {
            registry,
            prices,
            scanner,
            events,
        },
        store,
        extractor,
        _dir: dir,
    }
}

impl Harness {
    async fn add_link(&self, url: &str, competitor_id: i64) {
        self.state
            .registry
            .add(url, LinkRole::from(competitor_id))
            .await
            .unwrap();
    }
}

/// Drain every event currently buffered on a subscription.
fn drain(rx: &mut tokio::sync::broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_first_observation_broadcasts_with_no_old_price() {
    let h = harness();
    h.add_link(&url(1), 0).await;
    h.extractor.script(&url(1), Extraction::Listing(listing(89_990)));

    let mut bus = h.state.events.subscribe();
    let outcome = h.state.scanner.run_cycle().await.unwrap();

    let CycleOutcome::Completed(stats) = outcome else {
        panic!("expected a completed cycle");
    };
    assert_eq!(stats.checked, 1);
    assert_eq!(stats.changed, 1);

    assert_eq!(
        drain(&mut bus),
        vec![ServerEvent::PriceChange {
            url: url(1),
            name: "TechnoShop".to_string(),
            product_name: "iPhone 15".to_string(),
            old_price: None,
            new_price: 89_990,
            competitor_id: 0,
        }]
    );
    assert_eq!(
        *h.store.history.lock().unwrap(),
        vec![(url(1), 89_990)]
    );
}

#[tokio::test]
async fn test_price_change_broadcasts_old_and_new() {
    let h = harness();
    h.add_link(&url(1), 7).await;
    h.extractor.script(&url(1), Extraction::Listing(listing(89_990)));
    h.state.scanner.run_cycle().await.unwrap();

    h.extractor.script(&url(1), Extraction::Listing(listing(84_990)));
    let mut bus = h.state.events.subscribe();
    h.state.scanner.run_cycle().await.unwrap();

    assert_eq!(
        drain(&mut bus),
        vec![ServerEvent::PriceChange {
            url: url(1),
            name: "TechnoShop".to_string(),
            product_name: "iPhone 15".to_string(),
            old_price: Some(89_990),
            new_price: 84_990,
            competitor_id: 7,
        }]
    );
    assert_eq!(h.store.history.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unchanged_price_stays_silent() {
    let h = harness();
    h.add_link(&url(1), 0).await;
    h.extractor.script(&url(1), Extraction::Listing(listing(89_990)));
    h.state.scanner.run_cycle().await.unwrap();

    let mut bus = h.state.events.subscribe();
    h.state.scanner.run_cycle().await.unwrap();

    assert!(drain(&mut bus).is_empty());
    // History holds only the first observation.
    assert_eq!(h.store.history.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_challenge_leaves_state_untouched() {
    let h = harness();
    h.add_link(&url(1), 0).await;
    h.extractor.script(&url(1), Extraction::Listing(listing(89_990)));
    h.state.scanner.run_cycle().await.unwrap();

    h.extractor.script(&url(1), Extraction::ChallengeDetected);
    let mut bus = h.state.events.subscribe();
    h.state.scanner.run_cycle().await.unwrap();

    assert_eq!(
        drain(&mut bus),
        vec![ServerEvent::CaptchaDetected { url: url(1) }]
    );
    // Cached snapshot survives, so the next good read still diffs.
    assert_eq!(h.store.history.lock().unwrap().len(), 1);
    h.extractor.script(&url(1), Extraction::Listing(listing(79_990)));
    let mut bus = h.state.events.subscribe();
    h.state.scanner.run_cycle().await.unwrap();
    let events = drain(&mut bus);
    assert!(matches!(
        events.as_slice(),
        [ServerEvent::PriceChange {
            old_price: Some(89_990),
            new_price: 79_990,
            ..
        }]
    ));
}

#[tokio::test]
async fn test_unavailable_listing_is_skipped() {
    let h = harness();
    h.add_link(&url(1), 0).await;
    h.add_link(&url(2), 0).await;
    h.extractor.script(&url(1), Extraction::Unavailable);
    h.extractor.script(&url(2), Extraction::Listing(listing(1_000)));

    let mut bus = h.state.events.subscribe();
    let outcome = h.state.scanner.run_cycle().await.unwrap();

    let CycleOutcome::Completed(stats) = outcome else {
        panic!("expected a completed cycle");
    };
    assert_eq!(stats.checked, 2);
    assert_eq!(stats.unavailable, 1);
    assert_eq!(stats.changed, 1);

    // The unavailable url produces no event or history; its sibling does.
    let events = drain(&mut bus);
    assert!(matches!(
        events.as_slice(),
        [ServerEvent::PriceChange { new_price: 1_000, .. }]
    ));
    assert_eq!(*h.store.history.lock().unwrap(), vec![(url(2), 1_000)]);
}

#[tokio::test]
async fn test_concurrent_trigger_is_dropped() {
    let h = harness_with_delay(Some(Duration::from_millis(80)));
    h.add_link(&url(1), 0).await;
    h.extractor.script(&url(1), Extraction::Listing(listing(89_990)));

    let scanner = h.state.scanner.clone();
    let first = tokio::spawn(async move { scanner.run_cycle().await.unwrap() });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = h.state.scanner.run_cycle().await.unwrap();

    assert!(matches!(second, CycleOutcome::Skipped));
    assert!(matches!(
        first.await.unwrap(),
        CycleOutcome::Completed(_)
    ));
    // The url was extracted once, not twice.
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_update_links_resets_diffing() {
    let h = harness();
    let (tx, _rx) = mpsc::channel(8);

    h.add_link(&url(1), 0).await;
    h.extractor.script(&url(1), Extraction::Listing(listing(89_990)));
    h.state.scanner.run_cycle().await.unwrap();

    let mut bus = h.state.events.subscribe();
    handle_command(
        &h.state,
        ClientCommand::UpdateLinks {
            links: vec![LinkSpec::Url(url(1)), LinkSpec::Url(url(2))],
        },
        &tx,
    )
    .await;

    // Only the genuinely new url is announced.
    let events = drain(&mut bus);
    assert_eq!(
        events,
        vec![ServerEvent::Add {
            url: url(2),
            competitor_id: 0
        }]
    );

    // Snapshots were cleared, so even the surviving url's unchanged price
    // is a first observation again.
    h.extractor.script(&url(2), Extraction::Listing(listing(5_000)));
    let mut bus = h.state.events.subscribe();
    h.state.scanner.run_cycle().await.unwrap();

    let mut events = drain(&mut bus);
    events.sort_by_key(|event| match event {
        ServerEvent::PriceChange { url, .. } => url.clone(),
        _ => String::new(),
    });
    assert!(matches!(
        events.as_slice(),
        [
            ServerEvent::PriceChange {
                old_price: None,
                new_price: 89_990,
                ..
            },
            ServerEvent::PriceChange {
                old_price: None,
                new_price: 5_000,
                ..
            },
        ]
    ));
}

#[tokio::test]
async fn test_rejected_add_reaches_only_the_sender() {
    let h = harness();
    let (tx, mut rx) = mpsc::channel(8);
    let mut bus = h.state.events.subscribe();

    handle_command(
        &h.state,
        ClientCommand::Add {
            url: "https://www.avito.ru/item/1".to_string(),
            competitor_id: 0,
        },
        &tx,
    )
    .await;

    assert!(rx.try_recv().is_ok(), "sender gets an error frame");
    assert!(drain(&mut bus).is_empty(), "nothing is broadcast");
    assert!(h.state.registry.is_empty().await);
}
