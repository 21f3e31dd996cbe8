//! Responsive image markup helpers.
//!
//! Builds `srcset` candidates that point back at the derivative route, so a
//! browser picks a width and the [`DerivativeCache`](crate::DerivativeCache)
//! produces it on demand.

use url::form_urlencoded;

use crate::cache::OutputFormat;

/// Candidate widths offered below the image's own maximum.
pub const STANDARD_WIDTHS: [u32; 7] = [320, 480, 640, 768, 1024, 1280, 1600];

/// `sizes` attribute used when the template does not supply one.
pub const DEFAULT_SIZES: &str = "(max-width: 600px) 100vw, (max-width: 1024px) 50vw, 25vw";

/// `Cache-Control` value for derivative responses. Derivatives are
/// content-addressed, so they never change under a given URL.
pub const CACHE_CONTROL: &str = "public, max-age=15552000";

/// Widths to offer for an image no wider than `max_width`.
pub fn derivative_widths(max_width: u32) -> Vec<u32> {
    let mut widths: Vec<u32> = STANDARD_WIDTHS.into_iter().filter(|w| *w < max_width).collect();
    if max_width > 0 {
        widths.push(max_width);
    }
    widths
}

/// URL of one derivative under `route`.
pub fn derivative_url(route: &str, source_url: &str, width: u32, format: OutputFormat) -> String {
    let encoded: String = form_urlencoded::byte_serialize(source_url.as_bytes()).collect();
    format!(
        "{}/image.{}?url={encoded}&width={width}",
        route.trim_end_matches('/'),
        format.extension()
    )
}

/// Full `srcset` attribute value for `source_url`.
pub fn srcset(route: &str, source_url: &str, max_width: u32, format: OutputFormat) -> String {
    derivative_widths(max_width)
        .into_iter()
        .map(|w| format!("{} {w}w", derivative_url(route, source_url, w, format)))
        .collect::<Vec<_>>()
        .join(", ")
}
