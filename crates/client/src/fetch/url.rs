//! Source URL canonicalization and host allowlisting.

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("host not allowed: {0}")]
    HostNotAllowed(String),
}

/// Canonicalize an image source URL before it is fetched.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Protocol-relative `//host/...` becomes `https://host/...`
/// 3. Only `http` and `https` are accepted
/// 4. Lowercase the host, remove the fragment
/// 5. Keep query string intact (do not reorder)
///
/// The derivative key is hashed from the URL as given, not from this form,
/// so canonicalization only affects what is requested on the wire.
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = match trimmed.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_string(),
    };

    let mut parsed = url::Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    let host = parsed.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
    parsed.set_host(Some(&host)).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    parsed.set_fragment(None);

    Ok(parsed)
}

/// Hosts images may be fetched from. An empty list allows every host.
///
/// An entry matches the host itself and any subdomain of it, so
/// `example.com` admits `cdn.example.com` but not `badexample.com`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAllowlist {
    hosts: Vec<String>,
}

impl HostAllowlist {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().trim_start_matches("*.").trim_end_matches('.').to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn allows_host(&self, host: &str) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        let host = host.trim_end_matches('.').to_lowercase();
        self.hosts.iter().any(|allowed| {
            host == *allowed || host.strip_suffix(allowed.as_str()).is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// # Errors
    ///
    /// Returns `UrlError::HostNotAllowed` when the URL's host is not listed.
    pub fn check(&self, url: &url::Url) -> Result<(), UrlError> {
        let host = url.host_str().ok_or(UrlError::MissingHost)?;
        if self.allows_host(host) { Ok(()) } else { Err(UrlError::HostNotAllowed(host.to_string())) }
    }
}
