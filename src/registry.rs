use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::models::{LinkRole, MonitoredLink};
use crate::store::Storage;
use crate::{AppError, Result};

/// Outcome of an upsert, so callers know whether anything actually moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    RoleChanged,
    Unchanged,
}

/// Authoritative in-memory set of monitored links, mirrored to the durable
/// store on every mutation. All mutations are serialized behind one lock;
/// nothing else in the process may touch the map directly.
pub struct LinkRegistry {
    links: Mutex<HashMap<String, MonitoredLink>>,
    store: Arc<dyn Storage>,
    url_prefix: String,
}

impl LinkRegistry {
    pub fn new(store: Arc<dyn Storage>, url_prefix: impl Into<String>) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            store,
            url_prefix: url_prefix.into(),
        }
    }

    /// Load the persisted link set on startup.
    pub async fn hydrate(&self) -> Result<usize> {
        let persisted = self.store.list_links().await?;
        let mut links = self.links.lock().await;
        links.clear();
        for link in persisted {
            links.insert(link.url.clone(), link);
        }
        info!(count = links.len(), "registry hydrated from store");
        Ok(links.len())
    }

    /// A link must be a well-formed absolute URL under the marketplace
    /// prefix; anything else is rejected before it can reach the store.
    fn validate(&self, url: &str) -> Result<()> {
        if Url::parse(url).is_err() || !url.starts_with(&self.url_prefix) {
            return Err(AppError::InvalidLink { url: url.to_string() });
        }
        Ok(())
    }

    /// Strict insert used by the gateway's `add` command: an already
    /// monitored url is rejected, whatever its role.
    pub async fn add(&self, url: &str, role: LinkRole) -> Result<MonitoredLink> {
        self.validate(url)?;

        let mut links = self.links.lock().await;
        if links.contains_key(url) {
            return Err(AppError::DuplicateLink { url: url.to_string() });
        }

        let link = MonitoredLink::new(url, role);
        links.insert(url.to_string(), link.clone());
        self.store.upsert_link(url, role).await?;
        info!(url, competitor_id = role.competitor_id(), "link added");
        Ok(link)
    }

    /// Idempotent insert-or-update. Re-issuing the same (url, role) pair
    /// leaves both memory and store untouched.
    pub async fn upsert(&self, url: &str, role: LinkRole) -> Result<Upsert> {
        self.validate(url)?;

        let mut links = self.links.lock().await;
        match links.get_mut(url) {
            Some(existing) if existing.role == role => Ok(Upsert::Unchanged),
            Some(existing) => {
                existing.role = role;
                self.store.upsert_link(url, role).await?;
                Ok(Upsert::RoleChanged)
            }
            None => {
                links.insert(url.to_string(), MonitoredLink::new(url, role));
                self.store.upsert_link(url, role).await?;
                Ok(Upsert::Inserted)
            }
        }
    }

    /// Returns whether the url was present.
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let mut links = self.links.lock().await;
        if links.remove(url).is_none() {
            return Ok(false);
        }
        self.store.delete_link(url).await?;
        info!(url, "link removed");
        Ok(true)
    }

    /// Wholesale replacement. Entries failing prefix validation are
    /// skipped with a warning rather than poisoning the whole command.
    /// Returns the added links and the removed urls relative to the
    /// previous state.
    pub async fn replace_all(
        &self,
        new_links: Vec<(String, LinkRole)>,
    ) -> Result<(Vec<MonitoredLink>, Vec<String>)> {
        let mut incoming: HashMap<String, LinkRole> = HashMap::new();
        for (url, role) in new_links {
            if self.validate(&url).is_err() {
                warn!(url, "skipping invalid url in replacement set");
                continue;
            }
            incoming.insert(url, role);
        }

        let mut links = self.links.lock().await;

        let removed: Vec<String> = links
            .keys()
            .filter(|url| !incoming.contains_key(*url))
            .cloned()
            .collect();
        let added: Vec<MonitoredLink> = incoming
            .iter()
            .filter(|(url, _)| !links.contains_key(*url))
            .map(|(url, role)| MonitoredLink::new(url.clone(), *role))
            .collect();

        let mut replacement = HashMap::with_capacity(incoming.len());
        for (url, role) in &incoming {
            replacement.insert(url.clone(), MonitoredLink::new(url.clone(), *role));
        }
        *links = replacement;

        for link in &added {
            self.store.upsert_link(&link.url, link.role).await?;
        }
        for url in &removed {
            self.store.delete_link(url).await?;
        }

        info!(
            added = added.len(),
            removed = removed.len(),
            total = links.len(),
            "registry replaced"
        );
        Ok((added, removed))
    }

    pub async fn snapshot(&self) -> Vec<MonitoredLink> {
        self.links.lock().await.values().cloned().collect()
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.links.lock().await.contains_key(url)
    }

    pub async fn len(&self) -> usize {
        self.links.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.links.lock().await.is_empty()
    }
}
