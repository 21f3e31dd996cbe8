//! Image decode, resize and encode.
//!
//! The default [`ResizePolicy::Fill`] center-crops to a `width` x `width`
//! square, matching the thumbnails content templates expect. `Fit` keeps
//! the source aspect ratio instead.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crumb_core::{Error, OutputFormat, Transformer};

/// How a source image is mapped onto the requested width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResizePolicy {
    /// Scale and center-crop to a `width` x `width` square.
    #[default]
    Fill,
    /// Scale to `width`, keeping the aspect ratio.
    Fit,
}

/// [`Transformer`] backed by the `image` crate, using a Lanczos filter.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransformer {
    policy: ResizePolicy,
    jpeg_quality: u8,
    max_pixels: u64,
}

/// Output area allowed by default, about 40 megapixels.
pub const DEFAULT_MAX_PIXELS: u64 = 40_000_000;

impl Default for ImageTransformer {
    fn default() -> Self {
        Self { policy: ResizePolicy::Fill, jpeg_quality: 85, max_pixels: DEFAULT_MAX_PIXELS }
    }
}

impl ImageTransformer {
    pub fn new(policy: ResizePolicy) -> Self {
        Self { policy, ..Self::default() }
    }

    /// JPEG quality, clamped to `1..=100`.
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Largest output area accepted. Extreme aspect ratios under `Fit` are
    /// refused instead of allocating an oversized buffer.
    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels.max(1);
        self
    }

    pub fn policy(&self) -> ResizePolicy {
        self.policy
    }

    /// Output dimensions for `image` at `width` under the current policy.
    fn target_size(&self, image: &DynamicImage, width: u32) -> Result<(u32, u32), Error> {
        let height = match self.policy {
            ResizePolicy::Fill => u64::from(width),
            ResizePolicy::Fit => {
                (u64::from(image.height()) * u64::from(width) / u64::from(image.width().max(1))).max(1)
            }
        };
        let area = u64::from(width).saturating_mul(height);
        if area > self.max_pixels {
            return Err(Error::Decode(format!(
                "output {width}x{height} exceeds the {} pixel limit",
                self.max_pixels
            )));
        }
        let height = u32::try_from(height).map_err(|_| Error::Decode(format!("output height {height} too large")))?;
        Ok((width, height))
    }

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        match self.policy {
            ResizePolicy::Fill => image.resize_to_fill(width, height, FilterType::Lanczos3),
            ResizePolicy::Fit => image.resize_exact(width, height, FilterType::Lanczos3),
        }
    }

    fn encode(&self, image: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Vec::new();
        match format {
            OutputFormat::Png => image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?,
            OutputFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.jpeg_quality))?,
            OutputFormat::WebP => {
                DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)?
            }
        }
        Ok(out)
    }
}

impl Transformer for ImageTransformer {
    fn transform(&self, source: &[u8], width: u32, format: OutputFormat) -> Result<Vec<u8>, Error> {
        if width == 0 {
            return Err(Error::InvalidInput("width must be positive".into()));
        }

        let image = image::load_from_memory(source).map_err(|e| Error::Decode(format!("cannot decode source: {e}")))?;
        let (width, height) = self.target_size(&image, width)?;
        let resized = self.resize(&image, width, height);

        tracing::debug!(
            from_width = image.width(),
            from_height = image.height(),
            to_width = resized.width(),
            to_height = resized.height(),
            %format,
            "resized image"
        );

        self.encode(&resized, format)
            .map_err(|e| Error::Decode(format!("cannot encode {format}: {e}")))
    }
}
