use anyhow::{anyhow, Context};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::behavior::{run_pipeline, ActionSink, BehaviorStep};
use crate::config::ScraperConfig;
use crate::cookies::{CookieJar, StoredCookie};
use crate::identity::{ClientIdentity, ACCEPT, ACCEPT_LANGUAGE};
use crate::models::Listing;
use crate::{AppError, Result};

const STORE_NAME_SELECTOR: &str = ".userNick.auto-shy a";
const PRODUCT_NAME_SELECTOR: &str = r#".inplace.viewbull-field__model-name[data-field="model"]"#;
const PRICE_SELECTOR: &str = r#".viewbull-summary-price__value, [data-field="price"]"#;
const PRICE_ATTR: &str = "data-bulletin-price";

const CHALLENGE_SELECTORS: &[&str] = &[r#"input[type="text"]"#, r#"div[id*="captcha"]"#];

/// What one simulated browsing session yielded for a url. Failures are
/// values, not errors: a session can never abort its siblings.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Listing(Listing),
    /// Navigation error, timeout or a missing required field.
    Unavailable,
    /// The marketplace served a verification page instead of content.
    ChallengeDetected,
}

/// One extraction capability. The worker pool only knows this trait, so
/// tests drive scan cycles with scripted extractors.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Bring the backend up for a cycle. An error here is fatal for the
    /// whole cycle; the next trigger is the retry mechanism.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn extract(&self, url: &str) -> Extraction;
}

/// Headless-Chrome-backed extractor. The browser is launched lazily on
/// `prepare` and kept for the process lifetime; every `extract` opens a
/// fresh tab with a freshly rolled client identity.
pub struct ChromeExtractor {
    browser: tokio::sync::Mutex<Option<Arc<Browser>>>,
    jar: CookieJar,
    pipeline: Vec<BehaviorStep>,
    config: ScraperConfig,
}

impl ChromeExtractor {
    pub fn new(config: ScraperConfig, jar: CookieJar, pipeline: Vec<BehaviorStep>) -> Self {
        Self {
            browser: tokio::sync::Mutex::new(None),
            jar,
            pipeline,
            config,
        }
    }

    fn launch(config: &ScraperConfig) -> Result<Browser> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .args(vec![
                std::ffi::OsStr::new("--no-sandbox"),
                std::ffi::OsStr::new("--disable-setuid-sandbox"),
                std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
                std::ffi::OsStr::new("--disable-dev-shm-usage"),
                std::ffi::OsStr::new("--disable-gpu"),
            ])
            .build()
            .map_err(|e| AppError::Browser(format!("failed to build launch options: {e}")))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        Browser::new(launch_options)
            .map_err(|e| AppError::Browser(format!("failed to launch browser: {e}")))
    }
}

#[async_trait]
impl Extractor for ChromeExtractor {
    async fn prepare(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if browser.is_none() {
            *browser = Some(Arc::new(Self::launch(&self.config)?));
        }
        Ok(())
    }

    async fn extract(&self, url: &str) -> Extraction {
        let browser = match self.browser.lock().await.clone() {
            Some(browser) => browser,
            None => {
                warn!(url, "extract called before browser launch");
                return Extraction::Unavailable;
            }
        };

        let jar = self.jar.clone();
        let pipeline = self.pipeline.clone();
        let config = self.config.clone();
        let url = url.to_string();

        // The headless_chrome API is synchronous; keep each session off
        // the async workers so a chunk of sessions really runs in parallel.
        let outcome = tokio::task::spawn_blocking(move || {
            run_session(&browser, &jar, &pipeline, &config, &url)
        })
        .await;

        match outcome {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(%err, "extraction task panicked");
                Extraction::Unavailable
            }
        }
    }
}

fn run_session(
    browser: &Browser,
    jar: &CookieJar,
    pipeline: &[BehaviorStep],
    config: &ScraperConfig,
    url: &str,
) -> Extraction {
    let tab = match browser.new_tab() {
        Ok(tab) => tab,
        Err(err) => {
            warn!(url, %err, "could not open tab");
            return Extraction::Unavailable;
        }
    };

    let result = run_on_tab(&tab, jar, pipeline, config, url);
    let _ = tab.close(true);

    match result {
        Ok(extraction) => extraction,
        Err(err) => {
            warn!(url, %err, "session failed, treating url as unavailable");
            Extraction::Unavailable
        }
    }
}

fn run_on_tab(
    tab: &Arc<Tab>,
    jar: &CookieJar,
    pipeline: &[BehaviorStep],
    config: &ScraperConfig,
    url: &str,
) -> anyhow::Result<Extraction> {
    let mut rng = rand::thread_rng();
    let identity = ClientIdentity::random(&mut rng);

    tab.set_default_timeout(Duration::from_secs(config.nav_timeout_secs));
    tab.set_user_agent(
        identity.user_agent,
        Some(ACCEPT_LANGUAGE),
        Some(identity.platform),
    )
    .context("set user agent")?;

    let mut headers = HashMap::new();
    headers.insert("Accept", ACCEPT);
    headers.insert("Accept-Language", ACCEPT_LANGUAGE);
    tab.set_extra_http_headers(headers).context("set headers")?;

    tab.set_bounds(headless_chrome::types::Bounds::Normal {
        left: None,
        top: None,
        width: Some(identity.viewport_width as f64),
        height: Some(identity.viewport_height as f64),
    })
    .context("set viewport")?;

    if let Some(cookies) = jar.load() {
        if let Err(err) = tab.set_cookies(to_cookie_params(&cookies)?) {
            warn!(url, %err, "could not install cookie jar");
        }
    }

    tab.navigate_to(url).context("navigate")?;
    tab.wait_until_navigated().context("wait for navigation")?;

    run_pipeline(
        &TabActions { tab },
        pipeline,
        &mut rng,
        config.behavior_time_scale,
    )
    .context("behavior pipeline")?;

    if has_challenge_marker(&tab.get_content().context("page content")?) {
        warn!(url, "challenge page detected");
        return Ok(Extraction::ChallengeDetected);
    }

    let field_wait = Duration::from_secs(config.field_wait_secs);
    for selector in [STORE_NAME_SELECTOR, PRODUCT_NAME_SELECTOR, PRICE_SELECTOR] {
        if tab
            .wait_for_element_with_custom_timeout(selector, field_wait)
            .is_err()
        {
            warn!(url, selector, "required field did not appear in time");
            return Ok(Extraction::Unavailable);
        }
    }

    let listing = match parse_listing(&tab.get_content().context("page content")?) {
        Some(listing) => listing,
        None => {
            warn!(url, "required fields present but unparseable");
            return Ok(Extraction::Unavailable);
        }
    };

    match tab.get_cookies() {
        Ok(cookies) => {
            let stored: Vec<StoredCookie> = cookies
                .into_iter()
                .map(|c| StoredCookie {
                    name: c.name,
                    value: c.value,
                    domain: c.domain,
                    path: c.path,
                    expires: Some(c.expires),
                    http_only: c.http_only,
                    secure: c.secure,
                })
                .collect();
            if let Err(err) = jar.save(&stored) {
                warn!(url, %err, "could not persist cookie jar");
            }
        }
        Err(err) => warn!(url, %err, "could not read session cookies"),
    }

    Ok(Extraction::Listing(listing))
}

struct TabActions<'a> {
    tab: &'a Arc<Tab>,
}

impl ActionSink for TabActions<'_> {
    fn scroll_by(&self, delta_y: i64) -> anyhow::Result<()> {
        self.tab
            .evaluate(&format!("window.scrollBy(0, {delta_y});"), false)?;
        Ok(())
    }

    fn move_pointer(&self, x: f64, y: f64) -> anyhow::Result<()> {
        self.tab.evaluate(
            &format!(
                "document.dispatchEvent(new MouseEvent('mousemove', \
                 {{clientX: {x}, clientY: {y}, bubbles: true}}));"
            ),
            false,
        )?;
        Ok(())
    }

    fn click_safe_element(&self) -> anyhow::Result<()> {
        self.tab.evaluate(
            r#"
            (function() {
                const safeElements = document.querySelectorAll('p, div, span, a');
                if (safeElements.length > 0) {
                    const el = safeElements[Math.floor(Math.random() * safeElements.length)];
                    el.click();
                }
            })()
            "#,
            false,
        )?;
        Ok(())
    }
}

/// Cookie params for the DevTools protocol share field names with the
/// jar's camelCase serialization, so a JSON round-trip is the conversion.
fn to_cookie_params(
    cookies: &[StoredCookie],
) -> anyhow::Result<Vec<headless_chrome::protocol::cdp::Network::CookieParam>> {
    let value = serde_json::to_value(cookies)?;
    serde_json::from_value(value).map_err(|e| anyhow!("cookie conversion failed: {e}"))
}

/// True when the page shows a verification challenge instead of content.
pub fn has_challenge_marker(html: &str) -> bool {
    let document = Html::parse_document(html);
    CHALLENGE_SELECTORS.iter().any(|selector| {
        Selector::parse(selector)
            .map(|s| document.select(&s).next().is_some())
            .unwrap_or(false)
    })
}

/// Pull the three required fields out of a listing page. `None` when any
/// of them is missing or the price attribute does not parse.
pub fn parse_listing(html: &str) -> Option<Listing> {
    let document = Html::parse_document(html);

    let store_selector = Selector::parse(STORE_NAME_SELECTOR).ok()?;
    let product_selector = Selector::parse(PRODUCT_NAME_SELECTOR).ok()?;
    let price_selector = Selector::parse(PRICE_SELECTOR).ok()?;

    let store_name = element_text(&document, &store_selector)?;
    let product_name = element_text(&document, &product_selector)?;
    let price = document
        .select(&price_selector)
        .find_map(|el| el.value().attr(PRICE_ATTR))
        .and_then(parse_price)?;

    Some(Listing {
        store_name,
        product_name,
        price,
    })
}

fn element_text(document: &Html, selector: &Selector) -> Option<String> {
    let text = document
        .select(selector)
        .next()?
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// parseInt-style leniency: leading integer, trailing garbage ignored.
fn parse_price(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let digits: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
