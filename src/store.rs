use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

use crate::models::{LinkRole, MonitoredLink};
use crate::Result;

/// Durable registry/history collaborator. The engine only ever talks to
/// this interface; swapping the backing store does not touch the core.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upsert_link(&self, url: &str, role: LinkRole) -> Result<()>;
    async fn delete_link(&self, url: &str) -> Result<()>;
    async fn list_links(&self) -> Result<Vec<MonitoredLink>>;
    async fn append_history(
        &self,
        url: &str,
        store_name: &str,
        product_name: &str,
        price: i64,
    ) -> Result<()>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct LinkRow {
    url: String,
    competitor_id: i64,
    created_at: DateTime<Utc>,
}

impl SqliteStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS product_links (
                url TEXT PRIMARY KEY,
                competitor_id INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                product_name TEXT NOT NULL,
                price INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[cfg(test)]
    pub async fn history_count(&self, url: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM price_history WHERE url = ?")
                .bind(url)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn upsert_link(&self, url: &str, role: LinkRole) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_links (url, competitor_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET competitor_id = excluded.competitor_id
            "#,
        )
        .bind(url)
        .bind(role.competitor_id())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_link(&self, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM product_links WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_links(&self) -> Result<Vec<MonitoredLink>> {
        let rows: Vec<LinkRow> =
            sqlx::query_as("SELECT url, competitor_id, created_at FROM product_links")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|row| MonitoredLink {
                url: row.url,
                role: LinkRole::from(row.competitor_id),
                created_at: row.created_at,
            })
            .collect())
    }

    async fn append_history(
        &self,
        url: &str,
        store_name: &str,
        product_name: &str,
        price: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history (url, name, product_name, price, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(url)
        .bind(store_name)
        .bind(product_name)
        .bind(price)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        // A single connection keeps every query on the same in-memory database.
        SqliteStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_list() {
        let store = memory_store().await;
        store
            .upsert_link("https://www.farpost.ru/a", LinkRole::Own)
            .await
            .unwrap();
        store
            .upsert_link("https://www.farpost.ru/b", LinkRole::Competitor { id: 2 })
            .await
            .unwrap();

        let mut links = store.list_links().await.unwrap();
        links.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].role, LinkRole::Own);
        assert_eq!(links[1].role, LinkRole::Competitor { id: 2 });
    }

    #[tokio::test]
    async fn test_upsert_same_url_updates_role() {
        let store = memory_store().await;
        store
            .upsert_link("https://www.farpost.ru/a", LinkRole::Own)
            .await
            .unwrap();
        store
            .upsert_link("https://www.farpost.ru/a", LinkRole::Competitor { id: 9 })
            .await
            .unwrap();

        let links = store.list_links().await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].role, LinkRole::Competitor { id: 9 });
    }

    #[tokio::test]
    async fn test_delete_link() {
        let store = memory_store().await;
        store
            .upsert_link("https://www.farpost.ru/a", LinkRole::Own)
            .await
            .unwrap();
        store.delete_link("https://www.farpost.ru/a").await.unwrap();

        assert!(store.list_links().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_append_only() {
        let store = memory_store().await;
        let url = "https://www.farpost.ru/a";
        store.append_history(url, "Shop", "Phone", 100).await.unwrap();
        store.append_history(url, "Shop", "Phone", 90).await.unwrap();

        assert_eq!(store.history_count(url).await.unwrap(), 2);
    }
}
