pub mod gateway;
pub mod protocol;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::price_store::PriceStore;
use crate::registry::LinkRegistry;
use crate::scanner::Scanner;
use crate::Result;

/// Shared handles every connection works against.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<LinkRegistry>,
    pub prices: Arc<PriceStore>,
    pub scanner: Arc<Scanner>,
    pub events: EventBus,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(gateway::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(crate::AppError::Io)?;
    info!(%addr, "listening");

    axum::serve(listener, create_router(state))
        .await
        .map_err(crate::AppError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::cookies::CookieJar;
    use crate::scraper::{Extraction, Extractor};
    use crate::store::testing::MemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct NoopExtractor;

    #[async_trait]
    impl Extractor for NoopExtractor {
        async fn extract(&self, _url: &str) -> Extraction {
            Extraction::Unavailable
        }
    }

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new(8);
        let registry = Arc::new(LinkRegistry::new(store.clone(), "https://www.farpost.ru/"));
        let prices = Arc::new(PriceStore::new(store, events.clone()));
        let scanner = Arc::new(Scanner::new(
            registry.clone(),
            prices.clone(),
            Arc::new(NoopExtractor),
            events.clone(),
            CookieJar::new(dir.path().join("cookies.json")),
            ScraperConfig {
                marketplace_prefix: "https://www.farpost.ru/".to_string(),
                max_concurrent_pages: 2,
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
        AppState {
            registry,
            prices,
            scanner,
            events,
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(&dir));

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let router = create_router(test_state(&dir));

        // A plain GET without upgrade headers is refused, not 404.
        let response = router
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::NOT_FOUND);
        assert!(!response.status().is_success());
    }
}
