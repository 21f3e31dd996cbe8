//! HTTP fetch pipeline for image sources, with SSRF protection.
//!
//! ### URL Canonicalization
//! - Trim whitespace, upgrade protocol-relative URLs to `https`
//! - Lowercase host, remove fragments
//! - Preserve query string
//!
//! ### SSRF & Safety Gates
//! - Optional host allowlist, applied to the first request and every redirect
//! - Deny private ranges (RFC1918, link-local, localhost, etc.) for literal
//!   IPs and for every DNS answer, unless private hosts are explicitly allowed
//! - Max redirects: 5
//! - Max body bytes: 20MB (configurable), enforced while streaming
//!
//! ### Error mapping
//! - 404 and 410 from the host are `NotFound`
//! - Other statuses, network failures and timeouts are `Upstream`
//! - URLs that fail canonicalization or the safety gates are `InvalidInput`

pub mod ssrf;
pub mod url;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode, Url, header};

pub use self::ssrf::{PublicResolver, SsrfError, validate_ip};
pub use self::url::{HostAllowlist, UrlError, canonicalize};

use crumb_core::{AppConfig, Error, SourceFetcher};

/// `Accept` header sent to image hosts.
const IMAGE_ACCEPT: &str = "image/webp,image/png,image/jpeg,image/*;q=0.8,*/*;q=0.5";

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "crumb/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 20MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Hosts sources may come from (default: any)
    pub allowlist: HostAllowlist,

    /// Whether private and loopback addresses may be fetched (default: false)
    pub allow_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "crumb/0.1".to_string(),
            max_bytes: 20 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
            allowlist: HostAllowlist::default(),
            allow_private_hosts: false,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            allowlist: HostAllowlist::new(&config.allowed_image_hosts),
            allow_private_hosts: config.allow_private_hosts,
            ..Self::default()
        }
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
}

/// HTTP fetch client for image sources.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(redirect_policy(&config))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true);

        if !config.allow_private_hosts {
            builder = builder.dns_resolver(Arc::new(PublicResolver));
        }

        let http = builder
            .build()
            .map_err(|e| Error::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Fetch an image source, returning raw bytes and metadata.
    ///
    /// # Errors
    ///
    /// See the module docs for how failures map onto [`Error`].
    pub async fn fetch(&self, url_str: &str) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let url = canonicalize(url_str).map_err(|e| Error::InvalidInput(e.to_string()))?;
        check_target(&url, &self.config.allowlist, self.config.allow_private_hosts)?;

        let response = self
            .http
            .get(url.as_str())
            .header(header::ACCEPT, IMAGE_ACCEPT)
            .send()
            .await
            .map_err(|e| request_error(&url, &e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(Error::NotFound(format!("{url} returned status {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(Error::Upstream(format!("{url} returned status {}", status.as_u16())));
        }

        if let Some(len) = response.content_length()
            && len > self.config.max_bytes as u64
        {
            return Err(too_large(&url, self.config.max_bytes));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = self.read_body(response, &url).await?;
        tracing::debug!(
            url = %url,
            final_url = %final_url,
            elapsed_ms = start.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "fetched image source"
        );

        Ok(FetchResponse { final_url, status, content_type, bytes })
    }

    async fn read_body(&self, mut response: Response, url: &Url) -> Result<Bytes, Error> {
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| request_error(url, &e))? {
            if body.len() + chunk.len() > self.config.max_bytes {
                return Err(too_large(url, self.config.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[async_trait]
impl SourceFetcher for FetchClient {
    async fn fetch_source(&self, url: &str) -> Result<Bytes, Error> {
        self.fetch(url).await.map(|response| response.bytes)
    }
}

/// Scheme, allowlist and literal-IP checks for a request or redirect target.
fn check_target(url: &Url, allowlist: &HostAllowlist, allow_private: bool) -> Result<(), Error> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidInput(UrlError::UnsupportedScheme(url.scheme().to_string()).to_string()));
    }
    allowlist.check(url).map_err(|e| Error::InvalidInput(e.to_string()))?;

    if !allow_private {
        let ip: Option<IpAddr> = match url.host() {
            Some(::url::Host::Ipv4(v4)) => Some(v4.into()),
            Some(::url::Host::Ipv6(v6)) => Some(v6.into()),
            _ => None,
        };
        if let Some(ip) = ip {
            validate_ip(ip).map_err(|e| Error::InvalidInput(e.to_string()))?;
        }
    }
    Ok(())
}

fn redirect_policy(config: &FetchConfig) -> Policy {
    let max = config.max_redirects;
    let allowlist = config.allowlist.clone();
    let allow_private = config.allow_private_hosts;

    Policy::custom(move |attempt| {
        if attempt.previous().len() >= max {
            return attempt.error(format!("more than {max} redirects"));
        }
        match check_target(attempt.url(), &allowlist, allow_private) {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(e),
        }
    })
}

/// Map a reqwest failure, surfacing safety-gate rejections raised inside
/// the redirect policy or resolver as `InvalidInput`.
fn request_error(url: &Url, err: &reqwest::Error) -> Error {
    if let Some(rejected) = find_cause::<Error>(err) {
        return rejected.clone();
    }
    if let Some(blocked) = find_cause::<SsrfError>(err) {
        return Error::InvalidInput(format!("{url}: {blocked}"));
    }
    if err.is_timeout() {
        return Error::Upstream(format!("timed out fetching {url}"));
    }
    Error::Upstream(format!("network error fetching {url}: {err}"))
}

fn find_cause<'a, E: std::error::Error + 'static>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a E> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

fn too_large(url: &Url, max_bytes: usize) -> Error {
    Error::Upstream(format!("{url} exceeds {max_bytes} bytes"))
}
