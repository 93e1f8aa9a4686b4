use serde::{Deserialize, Serialize};

use crate::models::{LinkRole, PriceChange};

/// Commands a dashboard client can issue over the persistent connection.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Full replacement of the monitored set.
    UpdateLinks { links: Vec<LinkSpec> },
    #[serde(rename_all = "camelCase")]
    Add {
        url: String,
        #[serde(default)]
        competitor_id: i64,
    },
    Remove { url: String },
}

/// `updateLinks` entries arrive either as bare url strings or as
/// `{url, competitorId}` objects; older dashboards send the former.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LinkSpec {
    Url(String),
    #[serde(rename_all = "camelCase")]
    Full {
        url: String,
        #[serde(default)]
        competitor_id: i64,
    },
}

impl LinkSpec {
    pub fn into_parts(self) -> (String, LinkRole) {
        match self {
            LinkSpec::Url(url) => (url, LinkRole::Own),
            LinkSpec::Full { url, competitor_id } => (url, LinkRole::from(competitor_id)),
        }
    }
}

/// Events fanned out to every open subscriber connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Add { url: String, competitor_id: i64 },
    Remove { url: String },
    #[serde(rename_all = "camelCase")]
    PriceChange {
        url: String,
        name: String,
        product_name: String,
        old_price: Option<i64>,
        new_price: i64,
        competitor_id: i64,
    },
    CaptchaDetected { url: String },
}

impl ServerEvent {
    pub fn link_added(url: impl Into<String>, role: LinkRole) -> Self {
        ServerEvent::Add {
            url: url.into(),
            competitor_id: role.competitor_id(),
        }
    }

    pub fn link_removed(url: impl Into<String>) -> Self {
        ServerEvent::Remove { url: url.into() }
    }

    pub fn price_change(change: &PriceChange) -> Self {
        ServerEvent::PriceChange {
            url: change.url.clone(),
            name: change.store_name.clone(),
            product_name: change.product_name.clone(),
            old_price: change.old_price,
            new_price: change.new_price,
            competitor_id: change.role.competitor_id(),
        }
    }

    pub fn captcha_detected(url: impl Into<String>) -> Self {
        ServerEvent::CaptchaDetected { url: url.into() }
    }
}

/// Error frames are addressed to the originating connection only and
/// carry no action tag, matching what the dashboard expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReply {
    pub error: String,
}
