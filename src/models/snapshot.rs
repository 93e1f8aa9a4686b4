use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::LinkRole;

/// The data triple one successful extraction yields. Prices on the
/// marketplace are whole rubles, so an integer is enough.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listing {
    pub store_name: String,
    pub product_name: String,
    pub price: i64,
}

/// Last known extracted value for a url, held in the live cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSnapshot {
    pub store_name: String,
    pub product_name: String,
    pub price: i64,
    pub observed_at: DateTime<Utc>,
}

impl PriceSnapshot {
    pub fn from_listing(listing: &Listing) -> Self {
        Self {
            store_name: listing.store_name.clone(),
            product_name: listing.product_name.clone(),
            price: listing.price,
            observed_at: Utc::now(),
        }
    }
}

/// A detected price transition for one url. `old_price` is `None` on the
/// first observation after a url enters the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceChange {
    pub url: String,
    pub store_name: String,
    pub product_name: String,
    pub old_price: Option<i64>,
    pub new_price: i64,
    pub role: LinkRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_from_listing() {
        let listing = Listing {
            store_name: "TechnoShop".to_string(),
            product_name: "iPhone 15".to_string(),
            price: 89_990,
        };
        let snapshot = PriceSnapshot::from_listing(&listing);
        assert_eq!(snapshot.store_name, "TechnoShop");
        assert_eq!(snapshot.price, 89_990);
    }
}
