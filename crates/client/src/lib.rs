//! Client code for crumb.
//!
//! This crate provides the collaborators the derivative cache plugs in:
//! the HTTP image source fetcher and the image transformer.

pub mod fetch;
pub mod transform;

pub use fetch::{FetchClient, FetchConfig, FetchResponse, HostAllowlist};
pub use transform::{DEFAULT_MAX_PIXELS, ImageTransformer, ResizePolicy};
