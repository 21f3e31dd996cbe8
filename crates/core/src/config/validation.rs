//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Largest accepted page TTL (one day).
const MAX_PAGE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Largest accepted source image download (100MB).
const MAX_SOURCE_BYTES: usize = 100 * 1024 * 1024;

/// Largest accepted derivative width.
const MAX_WIDTH_LIMIT: u32 = 16_384;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `page_ttl_ms` is 0 or exceeds one day
    /// - `refresh_backoff_max_ms` is below `refresh_backoff_ms`
    /// - `max_bytes` is 0 or exceeds 100MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_width` is 0 or exceeds 16384
    /// - `user_agent` is empty
    /// - `image_route` does not start with `/`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_ttl_ms == 0 {
            return Err(invalid("page_ttl_ms", "must be greater than 0"));
        }
        if self.page_ttl_ms > MAX_PAGE_TTL_MS {
            return Err(invalid("page_ttl_ms", "must not exceed one day (86400000ms)"));
        }

        if self.refresh_backoff_max_ms < self.refresh_backoff_ms {
            return Err(invalid("refresh_backoff_max_ms", "must be at least refresh_backoff_ms"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > MAX_SOURCE_BYTES {
            return Err(invalid("max_bytes", "must not exceed 100MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_width == 0 || self.max_width > MAX_WIDTH_LIMIT {
            return Err(invalid("max_width", "must be between 1 and 16384"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if !self.image_route.starts_with('/') {
            return Err(invalid("image_route", "must start with '/'"));
        }

        if self.allow_private_hosts && self.allowed_image_hosts.is_empty() {
            tracing::warn!(
                "allow_private_hosts is set without allowed_image_hosts; \
                 any internal address may be fetched as an image source"
            );
        }

        Ok(())
    }
}
