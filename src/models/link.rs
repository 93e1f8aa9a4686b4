use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag distinguishing our own listings from competitor listings.
///
/// On the wire and in the database this is the `competitor_id` integer the
/// dashboard already speaks: `0` marks an own listing, anything else is the
/// id of the competitor the listing belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "i64", into = "i64")]
pub enum LinkRole {
    Own,
    Competitor { id: i64 },
}

impl LinkRole {
    pub fn competitor_id(self) -> i64 {
        match self {
            LinkRole::Own => 0,
            LinkRole::Competitor { id } => id,
        }
    }

    pub fn is_own(self) -> bool {
        matches!(self, LinkRole::Own)
    }
}

impl From<i64> for LinkRole {
    fn from(id: i64) -> Self {
        if id == 0 {
            LinkRole::Own
        } else {
            LinkRole::Competitor { id }
        }
    }
}

impl From<LinkRole> for i64 {
    fn from(role: LinkRole) -> Self {
        role.competitor_id()
    }
}

/// One monitored marketplace URL. Owned exclusively by the registry;
/// mutated only through registry operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredLink {
    pub url: String,
    pub role: LinkRole,
    pub created_at: DateTime<Utc>,
}

impl MonitoredLink {
    pub fn new(url: impl Into<String>, role: LinkRole) -> Self {
        Self {
            url: url.into(),
            role,
            created_at: Utc::now(),
        }
    }
}
