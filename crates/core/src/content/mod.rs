//! SQLite-backed content repository.
//!
//! The page cache only sees the [`ContentSource`] contract; [`ContentDb`] is
//! the production implementation. It has no side effects visible to the
//! cache: every call is a fresh read of the store.

pub mod connection;
pub mod migrations;
pub mod pages;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Error;
use crate::page::{PageData, PageKey};

pub use connection::ContentDb;

/// Where the page cache loads page content from.
///
/// Implementations return `Error::NotFound` when no page exists for the key
/// and `Error::Upstream` when the backend itself failed.
#[async_trait]
pub trait ContentSource: Send + Sync + 'static {
    async fn fetch_page(&self, key: &PageKey) -> Result<PageData, Error>;
}

#[async_trait]
impl<S: ContentSource + ?Sized> ContentSource for Arc<S> {
    async fn fetch_page(&self, key: &PageKey) -> Result<PageData, Error> {
        (**self).fetch_page(key).await
    }
}

#[async_trait]
impl ContentSource for ContentDb {
    async fn fetch_page(&self, key: &PageKey) -> Result<PageData, Error> {
        ContentDb::fetch_page(self, key).await.map_err(|err| match err {
            Error::Database(msg) => Error::Upstream(msg),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_errors_surface_as_upstream() {
        let db = ContentDb::open_in_memory().await.unwrap();
        db.execute_batch("DROP TABLE page_blocks; DROP TABLE pages;").await.unwrap();

        let result = ContentSource::fetch_page(&db, &PageKey::Root).await;
        assert!(matches!(result, Err(Error::Upstream(_))));
    }

    #[tokio::test]
    async fn test_not_found_passes_through() {
        let db = ContentDb::open_in_memory().await.unwrap();
        let source: Arc<dyn ContentSource> = Arc::new(db);

        let result = source.fetch_page(&PageKey::from_path("/nope")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_page_cache_serves_edits_after_ttl() {
        use crate::cache::{PageCache, PageCacheConfig};
        use std::time::Duration;

        let db = ContentDb::open_in_memory().await.unwrap();
        db.execute_batch("CREATE TABLE hero (id INTEGER PRIMARY KEY, heading TEXT);").await.unwrap();
        db.execute_batch("INSERT INTO hero (id, heading) VALUES (1, 'Welcome');").await.unwrap();
        let page_id = db.insert_page(Some("/about"), "published", "About").await.unwrap();
        db.insert_block(page_id, "hero", "1", 0).await.unwrap();

        let config = PageCacheConfig { ttl: Duration::from_millis(200), ..PageCacheConfig::default() };
        let cache = PageCache::new(db.clone(), config);

        let page = cache.get("/about").await.unwrap();
        assert_eq!(page.blocks[0].get("heading").and_then(|v| v.as_str()), Some("Welcome"));

        db.execute_batch("UPDATE pages SET title = 'About us'; UPDATE hero SET heading = 'Hello';").await.unwrap();
        assert_eq!(cache.get("/about").await.unwrap().title, "About");

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.get("/about").await.unwrap().title, "About");

        let mut refreshed = cache.get("/about").await.unwrap();
        for _ in 0..200 {
            if refreshed.title != "About" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            refreshed = cache.get("/about").await.unwrap();
        }
        assert_eq!(refreshed.title, "About us");
        assert_eq!(refreshed.blocks[0].get("heading").and_then(|v| v.as_str()), Some("Hello"));

        assert!(cache.get("/missing").await.unwrap_err().is_not_found());
    }
}
