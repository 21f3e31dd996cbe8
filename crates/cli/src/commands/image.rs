//! `crumb image`: resolve one derivative.

use std::path::PathBuf;

use serde::Serialize;

use crumb_core::srcset::CACHE_CONTROL;
use crumb_core::{DerivativeCache, Error, OutputFormat, SourceFetcher, Transformer};

/// A resolved derivative and the headers a server would send with it.
#[derive(Debug, Clone, Serialize)]
pub struct ImageOutput {
    pub path: PathBuf,
    pub width: u32,
    pub format: OutputFormat,
    pub content_type: &'static str,
    pub cache_control: &'static str,
    pub size_bytes: u64,
}

/// An explicit format wins over `Accept` negotiation.
pub fn pick_format(format: Option<&str>, accept: Option<&str>) -> Result<OutputFormat, Error> {
    match format {
        Some(name) => name.parse(),
        None => Ok(OutputFormat::negotiate(accept)),
    }
}

pub async fn image_impl<F: SourceFetcher, T: Transformer>(
    cache: &DerivativeCache<F, T>, url: &str, width: u32, format: OutputFormat,
) -> Result<ImageOutput, Error> {
    let path = cache.resolve(url, width, format).await?;
    let size_bytes = tokio::fs::metadata(&path).await?.len();

    Ok(ImageOutput {
        path,
        width,
        format,
        content_type: format.mime_type(),
        cache_control: CACHE_CONTROL,
        size_bytes,
    })
}
