//! Output formats for image derivatives.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Encodings a derivative can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
    WebP,
}

/// Preference order when the client lists several formats.
const PREFERENCE: [OutputFormat; 3] = [OutputFormat::WebP, OutputFormat::Png, OutputFormat::Jpeg];

impl OutputFormat {
    /// File extension, also used in derivative filenames.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebP => "image/webp",
        }
    }

    /// Pick a format from a request's `Accept` header.
    ///
    /// A missing, empty or `*/*` header gets PNG, which every client decodes.
    /// Otherwise the first of WebP, PNG, JPEG the header lists is chosen,
    /// falling back to PNG.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept.map(str::trim).filter(|a| !a.is_empty() && *a != "*/*") else {
            return OutputFormat::Png;
        };

        let listed: Vec<&str> = accept
            .split(',')
            .filter_map(|part| part.split(';').next())
            .map(str::trim)
            .collect();

        PREFERENCE
            .into_iter()
            .find(|format| listed.iter().any(|mime| mime.eq_ignore_ascii_case(format.mime_type())))
            .unwrap_or(OutputFormat::Png)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::WebP),
            other => Err(Error::InvalidInput(format!("unsupported image format: {other}"))),
        }
    }
}
