use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::events::EventBus;
use crate::models::{LinkRole, Listing, PriceChange, PriceSnapshot};
use crate::store::Storage;
use crate::web::protocol::ServerEvent;

/// Live cache of the last extracted value per url. Diffs every incoming
/// extraction against the cache; on a change it advances the cache,
/// appends a history row and broadcasts a price-change event.
pub struct PriceStore {
    cache: Mutex<HashMap<String, PriceSnapshot>>,
    store: Arc<dyn Storage>,
    events: EventBus,
}

impl PriceStore {
    pub fn new(store: Arc<dyn Storage>, events: EventBus) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            store,
            events,
        }
    }

    /// Diff a fresh extraction against the cache. Returns the change when
    /// one was detected. The first observation for a url always counts as
    /// a change with `old_price: None`.
    pub async fn apply(&self, url: &str, role: LinkRole, listing: &Listing) -> Option<PriceChange> {
        let old_price = {
            let mut cache = self.cache.lock().await;
            let old_price = cache.get(url).map(|snapshot| snapshot.price);
            if old_price == Some(listing.price) {
                return None;
            }
            cache.insert(url.to_string(), PriceSnapshot::from_listing(listing));
            old_price
        };

        let change = PriceChange {
            url: url.to_string(),
            store_name: listing.store_name.clone(),
            product_name: listing.product_name.clone(),
            old_price,
            new_price: listing.price,
            role,
        };

        info!(
            url,
            store = %change.store_name,
            product = %change.product_name,
            old_price = ?change.old_price,
            new_price = change.new_price,
            "price changed"
        );

        // The cache has already advanced; a refused history write is
        // logged and swallowed, never rolled back or retried.
        if let Err(err) = self
            .store
            .append_history(url, &listing.store_name, &listing.product_name, listing.price)
            .await
        {
            error!(url, %err, "failed to persist price history");
        }

        self.events.publish(ServerEvent::price_change(&change));
        Some(change)
    }

    /// Drop the snapshot for a url that left the registry or was freshly
    /// re-added, so the next extraction is a first observation again.
    pub async fn invalidate(&self, url: &str) {
        self.cache.lock().await.remove(url);
    }

    /// Discard every snapshot; used on wholesale registry replacement.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn snapshot_of(&self, url: &str) -> Option<PriceSnapshot> {
        self.cache.lock().await.get(url).cloned()
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }
}
