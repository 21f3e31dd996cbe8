//! `crumb srcset`: responsive image attribute values.

use serde::Serialize;

use crumb_core::OutputFormat;
use crumb_core::srcset::{DEFAULT_SIZES, derivative_widths, srcset};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SrcsetOutput {
    pub widths: Vec<u32>,
    pub srcset: String,
    pub sizes: &'static str,
}

pub fn srcset_impl(route: &str, url: &str, max_width: u32, format: OutputFormat) -> SrcsetOutput {
    SrcsetOutput {
        widths: derivative_widths(max_width),
        srcset: srcset(route, url, max_width, format),
        sizes: DEFAULT_SIZES,
    }
}
