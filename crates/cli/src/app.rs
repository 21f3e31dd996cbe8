//! Wiring of configuration, content store and caches.

use crumb_client::{FetchClient, FetchConfig, ImageTransformer};
use crumb_core::{AppConfig, ContentDb, DerivativeCache, DerivativeCacheConfig, Error, PageCache, PageCacheConfig};

use crate::cli::Overrides;

pub type Images = DerivativeCache<FetchClient, ImageTransformer>;

/// Long-lived application state, shared by every command.
pub struct App {
    pub config: AppConfig,
    pub content: ContentDb,
    pub pages: PageCache<ContentDb>,
    pub images: Images,
}

impl App {
    /// Open the content store and build both caches from `config`.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or migrated, or the HTTP client
    /// cannot be built.
    pub async fn open(config: AppConfig) -> Result<Self, Error> {
        let content = ContentDb::open(&config.content_db_path).await?;
        let pages = PageCache::new(content.clone(), PageCacheConfig::from(&config));

        let fetcher = FetchClient::new(FetchConfig::from(&config))?;
        let images = DerivativeCache::new(fetcher, ImageTransformer::default(), DerivativeCacheConfig::from(&config));

        tracing::debug!(
            content_db = %config.content_db_path.display(),
            image_cache_dir = %config.image_cache_dir.display(),
            "application state ready"
        );

        Ok(Self { config, content, pages, images })
    }
}

/// Apply command-line overrides on top of loaded configuration.
pub fn apply_overrides(mut config: AppConfig, overrides: &Overrides) -> AppConfig {
    if let Some(path) = &overrides.content_db_path {
        config.content_db_path = path.clone();
    }
    if let Some(dir) = &overrides.image_cache_dir {
        config.image_cache_dir = dir.clone();
    }
    config
}
