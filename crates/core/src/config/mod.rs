//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (CRUMB_*)
//! 2. TOML config file (if CRUMB_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (CRUMB_*)
/// 2. TOML config file (if CRUMB_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite content database.
    ///
    /// Set via CRUMB_CONTENT_DB_PATH environment variable.
    #[serde(default = "default_content_db_path")]
    pub content_db_path: PathBuf,

    /// Root directory for generated image derivatives.
    ///
    /// Set via CRUMB_IMAGE_CACHE_DIR environment variable.
    #[serde(default = "default_image_cache_dir")]
    pub image_cache_dir: PathBuf,

    /// Public route prefix that serves derivatives, used in srcset values.
    #[serde(default = "default_image_route")]
    pub image_route: String,

    /// How long a cached page is served without revalidation.
    ///
    /// Set via CRUMB_PAGE_TTL_MS environment variable.
    #[serde(default = "default_page_ttl_ms")]
    pub page_ttl_ms: u64,

    /// Delay before retrying a failed background refresh; doubles per failure.
    /// Zero retries on the next stale read.
    #[serde(default = "default_refresh_backoff_ms")]
    pub refresh_backoff_ms: u64,

    /// Upper bound for the refresh retry delay.
    #[serde(default = "default_refresh_backoff_max_ms")]
    pub refresh_backoff_max_ms: u64,

    /// How long a failed derivative is answered from memory before retrying.
    /// Zero disables failure caching.
    #[serde(default = "default_failure_ttl_ms")]
    pub failure_ttl_ms: u64,

    /// User-Agent string for image source requests.
    ///
    /// Set via CRUMB_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to download per source image.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Image source request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Largest derivative width accepted.
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// Hosts image sources may be fetched from. Empty allows any public host.
    ///
    /// Set via CRUMB_ALLOWED_IMAGE_HOSTS environment variable, e.g. `[cdn.example.com]`.
    #[serde(default)]
    pub allowed_image_hosts: Vec<String>,

    /// Allow image sources that resolve to private or loopback addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_content_db_path() -> PathBuf {
    PathBuf::from("./crumb-content.sqlite")
}

fn default_image_cache_dir() -> PathBuf {
    PathBuf::from(".generated/images")
}

fn default_image_route() -> String {
    "/.generated/images".into()
}

fn default_page_ttl_ms() -> u64 {
    10_000
}

fn default_refresh_backoff_ms() -> u64 {
    1_000
}

fn default_refresh_backoff_max_ms() -> u64 {
    60_000
}

fn default_failure_ttl_ms() -> u64 {
    15_000
}

fn default_user_agent() -> String {
    "crumb/0.1".into()
}

fn default_max_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_width() -> u32 {
    3840
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            content_db_path: default_content_db_path(),
            image_cache_dir: default_image_cache_dir(),
            image_route: default_image_route(),
            page_ttl_ms: default_page_ttl_ms(),
            refresh_backoff_ms: default_refresh_backoff_ms(),
            refresh_backoff_max_ms: default_refresh_backoff_max_ms(),
            failure_ttl_ms: default_failure_ttl_ms(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            max_width: default_max_width(),
            allowed_image_hosts: Vec::new(),
            allow_private_hosts: false,
        }
    }
}

impl AppConfig {
    /// Page TTL as Duration.
    pub fn page_ttl(&self) -> Duration {
        Duration::from_millis(self.page_ttl_ms)
    }

    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `CRUMB_`
    /// 2. TOML file from `CRUMB_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let config_file = std::env::var_os("CRUMB_CONFIG_FILE").map(PathBuf::from);
        Self::load_from(config_file.as_deref())
    }

    /// Like [`AppConfig::load`], with the TOML file given explicitly.
    ///
    /// # Errors
    ///
    /// Same as [`AppConfig::load`].
    pub fn load_from(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("CRUMB_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.content_db_path, PathBuf::from("./crumb-content.sqlite"));
        assert_eq!(config.image_cache_dir, PathBuf::from(".generated/images"));
        assert_eq!(config.image_route, "/.generated/images");
        assert_eq!(config.page_ttl_ms, 10_000);
        assert_eq!(config.failure_ttl_ms, 15_000);
        assert_eq!(config.user_agent, "crumb/0.1");
        assert_eq!(config.max_width, 3840);
        assert!(config.allowed_image_hosts.is_empty());
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.page_ttl(), Duration::from_secs(10));
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
    }

    #[test]
    fn test_load_layers_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("crumb.toml", "page_ttl_ms = 5000\nmax_width = 2048\n")?;
            jail.set_env("CRUMB_CONFIG_FILE", "crumb.toml");
            jail.set_env("CRUMB_MAX_WIDTH", "1920");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.page_ttl_ms, 5000);
            assert_eq!(config.max_width, 1920);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CRUMB_PAGE_TTL_MS", "0");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid { .. })));
            Ok(())
        });
    }
}
