//! Stale-while-revalidate page cache.
//!
//! Pages are served from memory by route key. A fresh entry is returned as
//! is; a stale entry is still returned immediately while at most one
//! background task reloads it from the content source. Only the first load
//! of a key makes the caller wait on the backend, and concurrent first loads
//! of one key share a single backend call.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::Error;
use crate::config::AppConfig;
use crate::content::ContentSource;
use crate::flight::SingleFlight;
use crate::page::{PageData, PageKey};

/// Tuning for [`PageCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCacheConfig {
    /// Age after which an entry is revalidated in the background.
    pub ttl: Duration,
    /// Wait after the first failed refresh; doubles per consecutive failure.
    pub backoff_base: Duration,
    /// Cap for the refresh retry wait.
    pub backoff_max: Duration,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(10), backoff_base: Duration::from_secs(1), backoff_max: Duration::from_secs(60) }
    }
}

impl From<&AppConfig> for PageCacheConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            ttl: config.page_ttl(),
            backoff_base: Duration::from_millis(config.refresh_backoff_ms),
            backoff_max: Duration::from_millis(config.refresh_backoff_max_ms),
        }
    }
}

impl PageCacheConfig {
    /// Retry wait after `failures` consecutive failed refreshes.
    fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 || self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures.saturating_sub(1).min(31)).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// One cached page.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<PageData>,
    fetched_at: Instant,
    refreshing: bool,
    failures: u32,
    retry_at: Option<Instant>,
    /// Distinguishes this entry from one re-created after invalidation.
    generation: u64,
}

impl CacheEntry {
    fn new(value: Arc<PageData>, now: Instant, generation: u64) -> Self {
        Self { value, fetched_at: now, refreshing: false, failures: 0, retry_at: None, generation }
    }

    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) >= ttl
    }

    /// Whether a stale entry may start a refresh now.
    fn should_refresh(&self, now: Instant) -> bool {
        !self.refreshing && self.retry_at.is_none_or(|at| now >= at)
    }

    fn commit(&mut self, value: Arc<PageData>, now: Instant) {
        *self = Self::new(value, now, self.generation);
    }

    fn record_failure(&mut self, now: Instant, config: &PageCacheConfig) {
        self.refreshing = false;
        self.failures = self.failures.saturating_add(1);
        self.retry_at = Some(now + config.backoff(self.failures));
    }
}

enum Lookup {
    Fresh(Arc<PageData>),
    Stale,
    Miss,
}

struct Inner<S> {
    source: S,
    config: PageCacheConfig,
    entries: RwLock<HashMap<PageKey, CacheEntry>>,
    loads: SingleFlight<PageKey, Arc<PageData>>,
    generations: AtomicU64,
}

/// Page content cache keyed by route path.
///
/// Cloning is cheap and every clone shares the same entries.
pub struct PageCache<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for PageCache<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: ContentSource> PageCache<S> {
    pub fn new(source: S, config: PageCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                entries: RwLock::new(HashMap::new()),
                loads: SingleFlight::new(),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Get the page for a route path.
    ///
    /// Only a cold miss waits on the content source and only a cold miss can
    /// fail; once a value is cached, refresh failures are logged and the
    /// previous value keeps being served.
    pub async fn get(&self, path: &str) -> Result<Arc<PageData>, Error> {
        let key = PageKey::from_path(path);

        match self.lookup(&key).await {
            Lookup::Fresh(value) => {
                tracing::debug!(page = %key, "page cache hit");
                Ok(value)
            }
            Lookup::Stale => match self.revalidate(&key).await {
                Some(value) => Ok(value),
                None => self.load(key).await,
            },
            Lookup::Miss => self.load(key).await,
        }
    }

    /// Drop the cached entry for a path. A refresh already running for it
    /// finishes without committing.
    pub async fn invalidate(&self, path: &str) -> bool {
        let key = PageKey::from_path(path);
        self.inner.entries.write().await.remove(&key).is_some()
    }

    /// Drop every cached entry.
    pub async fn clear(&self) {
        self.inner.entries.write().await.clear();
    }

    /// Number of cached pages.
    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn lookup(&self, key: &PageKey) -> Lookup {
        let entries = self.inner.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.is_stale(Instant::now(), self.inner.config.ttl) => {
                Lookup::Fresh(Arc::clone(&entry.value))
            }
            Some(_) => Lookup::Stale,
            None => Lookup::Miss,
        }
    }

    /// Serve a stale entry, starting its refresh when none is running.
    ///
    /// Returns `None` if the entry vanished since the read lock was released.
    async fn revalidate(&self, key: &PageKey) -> Option<Arc<PageData>> {
        let mut entries = self.inner.entries.write().await;
        let entry = entries.get_mut(key)?;
        let now = Instant::now();

        if entry.is_stale(now, self.inner.config.ttl) && entry.should_refresh(now) {
            entry.refreshing = true;
            tracing::debug!(page = %key, "page stale, refreshing in background");
            self.spawn_refresh(key.clone(), entry.generation);
        }

        Some(Arc::clone(&entry.value))
    }

    async fn load(&self, key: PageKey) -> Result<Arc<PageData>, Error> {
        tracing::debug!(page = %key, "page cache miss");
        let inner = Arc::clone(&self.inner);
        self.inner
            .loads
            .run(key.clone(), async move {
                let page = Arc::new(inner.source.fetch_page(&key).await?);
                let mut entries = inner.entries.write().await;
                let entry = entries.entry(key).or_insert_with(|| {
                    let generation = inner.generations.fetch_add(1, Ordering::Relaxed);
                    CacheEntry::new(Arc::clone(&page), Instant::now(), generation)
                });
                Ok(Arc::clone(&entry.value))
            })
            .await
    }

    fn spawn_refresh(&self, key: PageKey, generation: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.source.fetch_page(&key).await;

            let mut entries = inner.entries.write().await;
            let Some(entry) = entries.get_mut(&key).filter(|e| e.generation == generation) else {
                tracing::debug!(page = %key, "entry invalidated during refresh, discarding result");
                return;
            };
            let now = Instant::now();

            match result {
                Ok(page) => {
                    entry.commit(Arc::new(page), now);
                    tracing::info!(page = %key, "page refreshed");
                }
                Err(err) => {
                    entry.record_failure(now, &inner.config);
                    tracing::warn!(
                        page = %key,
                        error = %err,
                        failures = entry.failures,
                        "background page refresh failed, serving stale value"
                    );
                }
            }
        });
    }
}
