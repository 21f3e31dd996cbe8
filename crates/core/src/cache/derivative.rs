//! Content-addressed image derivative cache.
//!
//! A derivative is a resized and re-encoded copy of a remote image, stored
//! at `{root}/{sha256(url)}/{width}w.{ext}`. The file on disk is the source
//! of truth: the path is a pure function of the key, so a restarted process
//! finds earlier derivatives without any index. The in-memory readiness set
//! only saves the existence check.
//!
//! Concurrent requests for one key share a single fetch/transform/write; a
//! failed pipeline is remembered for a short time so a broken source is not
//! re-fetched on every request.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::format::OutputFormat;
use super::hash::hash_source_url;
use crate::Error;
use crate::config::AppConfig;
use crate::flight::SingleFlight;

/// Downloads source image bytes.
///
/// Returns `Error::NotFound` when the host has no such image and
/// `Error::Upstream` for any other network or HTTP failure.
#[async_trait]
pub trait SourceFetcher: Send + Sync + 'static {
    async fn fetch_source(&self, url: &str) -> Result<Bytes, Error>;
}

/// Decodes, resizes and encodes one image. CPU bound; called from the
/// blocking pool.
///
/// Returns `Error::Decode` when the bytes are not a supported image or the
/// result cannot be encoded.
pub trait Transformer: Send + Sync + 'static {
    fn transform(&self, source: &[u8], width: u32, format: OutputFormat) -> Result<Vec<u8>, Error>;
}

#[async_trait]
impl<F: SourceFetcher + ?Sized> SourceFetcher for Arc<F> {
    async fn fetch_source(&self, url: &str) -> Result<Bytes, Error> {
        (**self).fetch_source(url).await
    }
}

impl<T: Transformer + ?Sized> Transformer for Arc<T> {
    fn transform(&self, source: &[u8], width: u32, format: OutputFormat) -> Result<Vec<u8>, Error> {
        (**self).transform(source, width, format)
    }
}

/// Logical identity of a derivative.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativeKey {
    source_hash: String,
    width: u32,
    format: OutputFormat,
}

impl DerivativeKey {
    pub fn new(url: &str, width: u32, format: OutputFormat) -> Self {
        Self { source_hash: hash_source_url(url), width, format }
    }

    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Location of the derivative below the cache root.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.source_hash).join(format!("{}w.{}", self.width, self.format.extension()))
    }
}

/// Tuning for [`DerivativeCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeCacheConfig {
    /// Directory derivatives are written below.
    pub root: PathBuf,
    /// Largest width accepted by `resolve`.
    pub max_width: u32,
    /// How long a failed key answers with its error before retrying.
    pub failure_ttl: Duration,
}

impl DerivativeCacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), max_width: 3840, failure_ttl: Duration::from_secs(15) }
    }
}

impl From<&AppConfig> for DerivativeCacheConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            root: config.image_cache_dir.clone(),
            max_width: config.max_width,
            failure_ttl: Duration::from_millis(config.failure_ttl_ms),
        }
    }
}

#[derive(Debug, Clone)]
struct Failure {
    error: Error,
    until: Instant,
}

struct Inner<F, T> {
    fetcher: F,
    transformer: T,
    config: DerivativeCacheConfig,
    ready: RwLock<HashSet<DerivativeKey>>,
    failures: RwLock<HashMap<DerivativeKey, Failure>>,
    flights: SingleFlight<DerivativeKey, PathBuf>,
}

/// Memoizes image derivatives on disk.
///
/// Cloning is cheap and every clone shares state.
pub struct DerivativeCache<F, T> {
    inner: Arc<Inner<F, T>>,
}

impl<F, T> Clone for DerivativeCache<F, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<F: SourceFetcher, T: Transformer> DerivativeCache<F, T> {
    pub fn new(fetcher: F, transformer: T, config: DerivativeCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                transformer,
                config,
                ready: RwLock::new(HashSet::new()),
                failures: RwLock::new(HashMap::new()),
                flights: SingleFlight::new(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.config.root
    }

    /// Deterministic file path for a derivative, whether or not it exists yet.
    pub fn path_for(&self, url: &str, width: u32, format: OutputFormat) -> PathBuf {
        self.inner.config.root.join(DerivativeKey::new(url, width, format).relative_path())
    }

    /// Return the file holding `url` resized to `width` in `format`,
    /// generating it on first use.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty URL or a width outside `1..=max_width`
    /// - `NotFound` / `Upstream` when the source cannot be fetched
    /// - `Decode` when the source is not a usable image
    /// - `Persistence` when the derivative cannot be written
    pub async fn resolve(&self, url: &str, width: u32, format: OutputFormat) -> Result<PathBuf, Error> {
        if url.trim().is_empty() {
            return Err(Error::InvalidInput("image url cannot be empty".into()));
        }
        if width == 0 || width > self.inner.config.max_width {
            return Err(Error::InvalidInput(format!(
                "width {width} outside 1..={}",
                self.inner.config.max_width
            )));
        }

        let key = DerivativeKey::new(url, width, format);

        if self.inner.ready.read().await.contains(&key) {
            tracing::debug!(hash = %key.source_hash, width, %format, "derivative cache hit");
            return Ok(self.inner.config.root.join(key.relative_path()));
        }

        let inner = Arc::clone(&self.inner);
        let url = url.to_string();
        self.inner.flights.run(key.clone(), Inner::produce(inner, key, url)).await
    }

    /// Drop the in-memory state for a derivative, e.g. after an external
    /// housekeeper deleted its file. The next `resolve` checks the disk again.
    pub async fn forget(&self, url: &str, width: u32, format: OutputFormat) {
        let key = DerivativeKey::new(url, width, format);
        self.inner.ready.write().await.remove(&key);
        self.inner.failures.write().await.remove(&key);
    }

    /// Number of derivatives known to be on disk.
    pub async fn ready_count(&self) -> usize {
        self.inner.ready.read().await.len()
    }

}

impl<F: SourceFetcher, T: Transformer> Inner<F, T> {
    /// Disk check, then the full pipeline on a miss. Runs once per key at a time.
    ///
    /// A recent failure only short-circuits the pipeline; a file that appeared
    /// on disk in the meantime is still served.
    async fn produce(inner: Arc<Self>, key: DerivativeKey, url: String) -> Result<PathBuf, Error> {
        let path = inner.config.root.join(key.relative_path());

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::Persistence(format!("cannot inspect {}: {e}", path.display())))?;
        if exists {
            tracing::debug!(path = %path.display(), "derivative found on disk");
            inner.mark_ready(key).await;
            return Ok(path);
        }

        if let Some(error) = inner.recent_failure(&key).await {
            tracing::debug!(hash = %key.source_hash, width = key.width, format = %key.format, "derivative recently failed");
            return Err(error);
        }

        let started = Instant::now();
        match Self::generate(&inner, &key, &url, &path).await {
            Ok(()) => {
                tracing::info!(
                    path = %path.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "derivative generated"
                );
                inner.mark_ready(key).await;
                Ok(path)
            }
            Err(error) => {
                tracing::warn!(url = %url, width = key.width, format = %key.format, error = %error, "derivative failed");
                inner.remember_failure(key, &error).await;
                Err(error)
            }
        }
    }

    async fn generate(inner: &Arc<Self>, key: &DerivativeKey, url: &str, path: &Path) -> Result<(), Error> {
        let source = inner.fetcher.fetch_source(url).await?;

        let worker = Arc::clone(inner);
        let (width, format) = (key.width, key.format);
        let encoded = tokio::task::spawn_blocking(move || worker.transformer.transform(&source, width, format))
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))??;

        write_atomically(path, &encoded).await
    }

    async fn recent_failure(&self, key: &DerivativeKey) -> Option<Error> {
        let failures = self.failures.read().await;
        failures.get(key).filter(|f| Instant::now() < f.until).map(|f| f.error.clone())
    }

    async fn mark_ready(&self, key: DerivativeKey) {
        self.failures.write().await.remove(&key);
        self.ready.write().await.insert(key);
    }

    async fn remember_failure(&self, key: DerivativeKey, error: &Error) {
        if self.config.failure_ttl.is_zero() {
            return;
        }
        let until = Instant::now() + self.config.failure_ttl;
        let mut failures = self.failures.write().await;
        failures.retain(|_, f| Instant::now() < f.until);
        failures.insert(key, Failure { error: error.clone(), until });
    }
}

/// Write through a sibling temp file and rename, so `path` only ever holds a
/// complete derivative.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Persistence(format!("no parent directory for {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let tmp = path.with_extension(format!("{extension}.tmp-{}", std::process::id()));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    const URL: &str = "https://cms.example.com/assets/hero";

    struct FakeFetcher {
        response: Result<Bytes, Error>,
        calls: AtomicUsize,
        gate: Option<Semaphore>,
    }

    impl FakeFetcher {
        fn ok(body: &'static [u8]) -> Arc<Self> {
            Arc::new(Self { response: Ok(Bytes::from_static(body)), calls: AtomicUsize::new(0), gate: None })
        }

        fn failing(error: Error) -> Arc<Self> {
            Arc::new(Self { response: Err(error), calls: AtomicUsize::new(0), gate: None })
        }

        fn gated(response: Result<Bytes, Error>) -> Arc<Self> {
            Arc::new(Self { response, calls: AtomicUsize::new(0), gate: Some(Semaphore::new(0)) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch_source(&self, _url: &str) -> Result<Bytes, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.response.clone()
        }
    }

    /// Encodes "{width}:{format}:{source}" and rejects sources named "garbage".
    struct FakeTransformer;

    impl Transformer for FakeTransformer {
        fn transform(&self, source: &[u8], width: u32, format: OutputFormat) -> Result<Vec<u8>, Error> {
            if source == b"garbage" {
                return Err(Error::Decode("unrecognized image".into()));
            }
            let mut out = format!("{width}:{format}:").into_bytes();
            out.extend_from_slice(source);
            Ok(out)
        }
    }

    fn cache(fetcher: &Arc<FakeFetcher>, root: &Path) -> DerivativeCache<Arc<FakeFetcher>, FakeTransformer> {
        DerivativeCache::new(Arc::clone(fetcher), FakeTransformer, DerivativeCacheConfig::new(root))
    }

    #[test]
    fn test_key_relative_path() {
        let key = DerivativeKey::new(URL, 640, OutputFormat::Png);
        let expected = Path::new(&hash_source_url(URL)).join("640w.png");
        assert_eq!(key.relative_path(), expected);
        assert_eq!(key.width(), 640);
        assert_eq!(key.format(), OutputFormat::Png);
    }

    #[tokio::test]
    async fn test_resolve_generates_file_at_deterministic_path() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::ok(b"pixels");
        let cache = cache(&fetcher, dir.path());

        let path = cache.resolve(URL, 640, OutputFormat::Png).await.unwrap();
        assert_eq!(path, dir.path().join(hash_source_url(URL)).join("640w.png"));
        assert_eq!(path, cache.path_for(URL, 640, OutputFormat::Png));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"640:png:pixels");

        let again = cache.resolve(URL, 640, OutputFormat::Png).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.ready_count().await, 1);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&FakeFetcher::ok(b"pixels"), dir.path());

        let path = cache.resolve(URL, 320, OutputFormat::WebP).await.unwrap();
        let mut entries = tokio::fs::read_dir(path.parent().unwrap()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["320w.webp".to_string()]);
    }

    #[tokio::test]
    async fn test_restart_recovers_from_disk_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let first = FakeFetcher::ok(b"pixels");
        let path = cache(&first, dir.path()).resolve(URL, 640, OutputFormat::Png).await.unwrap();

        let second = FakeFetcher::ok(b"other");
        let restarted = cache(&second, dir.path());
        assert_eq!(restarted.ready_count().await, 0);

        let recovered = restarted.resolve(URL, 640, OutputFormat::Png).await.unwrap();
        assert_eq!(recovered, path);
        assert_eq!(second.calls(), 0);
        assert_eq!(restarted.ready_count().await, 1);
        assert_eq!(tokio::fs::read(&recovered).await.unwrap(), b"640:png:pixels");
    }

    #[tokio::test]
    async fn test_existing_file_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::ok(b"pixels");
        let cache = cache(&fetcher, dir.path());

        let path = cache.path_for(URL, 800, OutputFormat::Jpeg);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"placed by hand").await.unwrap();

        assert_eq!(cache.resolve(URL, 800, OutputFormat::Jpeg).await.unwrap(), path);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::gated(Ok(Bytes::from_static(b"pixels")));
        let cache = cache(&fetcher, dir.path());

        let resolves = futures::future::join_all((0..8).map(|_| cache.resolve(URL, 640, OutputFormat::Png)));
        let (results, ()) = tokio::join!(resolves, async {
            while fetcher.calls() == 0 {
                tokio::task::yield_now().await;
            }
            fetcher.gate.as_ref().unwrap().add_permits(1);
        });

        let expected = cache.path_for(URL, 640, OutputFormat::Png);
        assert!(results.iter().all(|r| r.as_ref() == Ok(&expected)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_resolves_share_one_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::gated(Ok(Bytes::from_static(b"pixels")));
        let cache = cache(&fetcher, dir.path());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve(URL, 640, OutputFormat::Png).await })
            })
            .collect();
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }
        fetcher.gate.as_ref().unwrap().add_permits(16);

        let expected = cache.path_for(URL, 640, OutputFormat::Png);
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(expected.clone()));
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::gated(Err(Error::Upstream("connection reset".into())));
        let cache = cache(&fetcher, dir.path());

        let resolves = futures::future::join_all((0..4).map(|_| cache.resolve(URL, 640, OutputFormat::Png)));
        let (results, ()) = tokio::join!(resolves, async {
            while fetcher.calls() == 0 {
                tokio::task::yield_now().await;
            }
            fetcher.gate.as_ref().unwrap().add_permits(1);
        });

        assert!(results.iter().all(|r| *r == Err(Error::Upstream("connection reset".into()))));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.ready_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_remembered_until_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::failing(Error::NotFound("404 from host".into()));
        let config = DerivativeCacheConfig { failure_ttl: Duration::from_secs(30), ..DerivativeCacheConfig::new(dir.path()) };
        let cache = DerivativeCache::new(Arc::clone(&fetcher), FakeTransformer, config);

        assert!(cache.resolve(URL, 640, OutputFormat::Png).await.unwrap_err().is_not_found());
        assert!(cache.resolve(URL, 640, OutputFormat::Png).await.unwrap_err().is_not_found());
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.resolve(URL, 640, OutputFormat::Png).await.is_err());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_file_on_disk_wins_over_remembered_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::failing(Error::Upstream("host down".into()));
        let cache = cache(&fetcher, dir.path());

        assert!(matches!(cache.resolve(URL, 640, OutputFormat::Png).await, Err(Error::Upstream(_))));

        let path = cache.path_for(URL, 640, OutputFormat::Png);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"written by another process").await.unwrap();

        assert_eq!(cache.resolve(URL, 640, OutputFormat::Png).await.unwrap(), path);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.ready_count().await, 1);
    }

    #[tokio::test]
    async fn test_zero_failure_ttl_retries_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::failing(Error::Upstream("timeout".into()));
        let config = DerivativeCacheConfig { failure_ttl: Duration::ZERO, ..DerivativeCacheConfig::new(dir.path()) };
        let cache = DerivativeCache::new(Arc::clone(&fetcher), FakeTransformer, config);

        for _ in 0..3 {
            assert!(matches!(cache.resolve(URL, 640, OutputFormat::Png).await, Err(Error::Upstream(_))));
        }
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_decode_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&FakeFetcher::ok(b"garbage"), dir.path());

        let result = cache.resolve(URL, 640, OutputFormat::Png).await;
        assert!(matches!(result, Err(Error::Decode(_))));
        assert!(!cache.path_for(URL, 640, OutputFormat::Png).exists());
        assert_eq!(cache.ready_count().await, 0);
    }

    #[tokio::test]
    async fn test_unwritable_root_is_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, b"file in the way").unwrap();
        let fetcher = FakeFetcher::ok(b"pixels");
        let cache = cache(&fetcher, &root);

        let result = cache.resolve(URL, 640, OutputFormat::Png).await;
        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(cache.ready_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_input_skips_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::ok(b"pixels");
        let cache = cache(&fetcher, dir.path());

        assert!(matches!(cache.resolve(URL, 0, OutputFormat::Png).await, Err(Error::InvalidInput(_))));
        assert!(matches!(cache.resolve(URL, 3841, OutputFormat::Png).await, Err(Error::InvalidInput(_))));
        assert!(matches!(cache.resolve("  ", 640, OutputFormat::Png).await, Err(Error::InvalidInput(_))));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_width_and_format_address_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::ok(b"pixels");
        let cache = cache(&fetcher, dir.path());

        let a = cache.resolve(URL, 320, OutputFormat::Png).await.unwrap();
        let b = cache.resolve(URL, 640, OutputFormat::Png).await.unwrap();
        let c = cache.resolve(URL, 640, OutputFormat::WebP).await.unwrap();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(a.parent(), c.parent());
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_forget_rechecks_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::ok(b"pixels");
        let cache = cache(&fetcher, dir.path());

        let path = cache.resolve(URL, 640, OutputFormat::Png).await.unwrap();
        cache.forget(URL, 640, OutputFormat::Png).await;
        assert_eq!(cache.ready_count().await, 0);

        assert_eq!(cache.resolve(URL, 640, OutputFormat::Png).await.unwrap(), path);
        assert_eq!(fetcher.calls(), 1);

        tokio::fs::remove_file(&path).await.unwrap();
        cache.forget(URL, 640, OutputFormat::Png).await;
        cache.resolve(URL, 640, OutputFormat::Png).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_config_from_app_config() {
        let app = AppConfig { max_width: 1920, failure_ttl_ms: 500, ..Default::default() };
        let config = DerivativeCacheConfig::from(&app);
        assert_eq!(config.root, PathBuf::from(".generated/images"));
        assert_eq!(config.max_width, 1920);
        assert_eq!(config.failure_ttl, Duration::from_millis(500));
    }
}
