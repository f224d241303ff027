//! Prefetcher configuration.
//!
//! Configuration is layered: built-in defaults, then an optional JSON file
//! named by `PREFETCH_CONFIG`, then individual environment overrides.
//! Missing JSON fields keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::DelayTable;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a [`Prefetcher`](crate::registry::Prefetcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Master switch. When `false`, triggers are accepted and ignored.
    pub enabled: bool,
    /// Log absorbed prefetch failures. Defaults to on in debug builds.
    pub dev_logging: bool,
    /// Products per listing page; drives list request `limit`/`offset`.
    pub page_size: u32,
    /// Freshness window for responses written by
    /// [`CachingClient`](crate::catalog::CachingClient).
    pub cache_ttl_ms: u64,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Reason -> delay/priority table.
    pub delays: DelayTable,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dev_logging: cfg!(debug_assertions),
            page_size: 12,
            cache_ttl_ms: 60_000,
            event_capacity: 256,
            delays: DelayTable::default(),
        }
    }
}

impl PrefetchConfig {
    /// Parses a JSON document, filling gaps with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] when a value fails validation.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&raw)
    }

    /// Builds configuration from the environment.
    ///
    /// Environment variables:
    /// - `PREFETCH_CONFIG`: path to a JSON config file (base layer)
    /// - `PREFETCH_ENABLED`: "true" or "false"
    /// - `PREFETCH_DEV_LOGGING`: "true" or "false"
    /// - `PREFETCH_PAGE_SIZE`: products per listing page
    /// - `PREFETCH_CACHE_TTL_MS`: cache freshness window
    /// - `PREFETCH_HOVER_DELAY_MS`: debounce delay for hover prefetches
    ///
    /// Unparseable numeric overrides are ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("PREFETCH_CONFIG") {
            Some(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        if let Some(v) = lookup("PREFETCH_ENABLED") {
            config.enabled = !v.eq_ignore_ascii_case("false");
        }
        if let Some(v) = lookup("PREFETCH_DEV_LOGGING") {
            config.dev_logging = v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("PREFETCH_PAGE_SIZE").and_then(|s| s.parse().ok()) {
            config.page_size = v;
        }
        if let Some(v) = lookup("PREFETCH_CACHE_TTL_MS").and_then(|s| s.parse().ok()) {
            config.cache_ttl_ms = v;
        }
        if let Some(v) = lookup("PREFETCH_HOVER_DELAY_MS").and_then(|s| s.parse().ok()) {
            config.delays.hover.delay_ms = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be greater than 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}
