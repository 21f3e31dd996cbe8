//! `crumb page`: read pages through the page cache.

use std::sync::Arc;

use serde::Serialize;

use crumb_core::{ContentSource, Error, PageCache, PageData, PageKey};

/// One loaded page.
#[derive(Debug, Clone, Serialize)]
pub struct PageOutput {
    /// Normalized request path.
    pub key: String,
    pub page: Arc<PageData>,
}

/// Load every path in order. Stops at the first failure.
pub async fn page_impl<S: ContentSource>(cache: &PageCache<S>, paths: &[String]) -> Result<Vec<PageOutput>, Error> {
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let page = cache.get(path).await?;
        out.push(PageOutput { key: PageKey::from_path(path).to_string(), page });
    }
    Ok(out)
}
