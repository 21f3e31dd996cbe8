//! Core types and shared functionality for crumb.
//!
//! This crate provides:
//! - Page content model and the SQLite content repository
//! - Page cache with stale-while-revalidate refresh
//! - Content-addressed image derivative cache
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod flight;
pub mod page;
pub mod srcset;

pub use cache::{
    DerivativeCache, DerivativeCacheConfig, DerivativeKey, OutputFormat, PageCache, PageCacheConfig, SourceFetcher,
    Transformer,
};
pub use config::{AppConfig, ConfigError};
pub use content::{ContentDb, ContentSource};
pub use error::Error;
pub use page::{Block, FieldValue, PageData, PageKey};
