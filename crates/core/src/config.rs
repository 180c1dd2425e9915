//! Data layer configuration, loaded from JSON supplied by the host app.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::network::http::with_trailing_slash;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        source: url::ParseError,
    },
    #[error("unsupported scheme for {field}: {scheme}")]
    UnsupportedScheme { field: &'static str, scheme: String },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{field} must be at most {max}")]
    OutOfRange { field: &'static str, max: u64 },
}

/// Upper bound for `global_max_age_secs`: thirty days.
pub const MAX_GLOBAL_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayerConfig {
    pub backend_url: String,
    pub socket_url: String,
    pub cache_root: PathBuf,
    pub data_root: PathBuf,
    pub global_max_age_secs: u64,
    /// Bumped by the host when the on-disk global data format changes.
    pub global_invalidation_key: Option<String>,
    pub push_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:4000".to_string(),
            socket_url: "ws://localhost:4000/socket".to_string(),
            cache_root: PathBuf::from("cache"),
            data_root: PathBuf::from("data"),
            global_max_age_secs: 3600,
            global_invalidation_key: None,
            push_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            request_timeout_ms: 4_000,
        }
    }
}

impl DataLayerConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend_url()?;
        self.socket_url()?;

        for (field, value) in [
            ("global_max_age_secs", self.global_max_age_secs),
            ("push_timeout_ms", self.push_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(field));
            }
        }
        if self.global_max_age_secs > MAX_GLOBAL_MAX_AGE_SECS {
            return Err(ConfigError::OutOfRange {
                field: "global_max_age_secs",
                max: MAX_GLOBAL_MAX_AGE_SECS,
            });
        }
        Ok(())
    }

    pub fn backend_url(&self) -> Result<Url, ConfigError> {
        parse_url("backend_url", &self.backend_url, &["http", "https"]).map(with_trailing_slash)
    }

    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        parse_url("socket_url", &self.socket_url, &["ws", "wss"])
    }

    /// Saturates at `TimeDelta::MAX` for values `validate` would reject.
    pub fn global_max_age(&self) -> TimeDelta {
        i64::try_from(self.global_max_age_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn system_paths(&self) -> SystemPaths {
        SystemPaths::new(self.cache_root.clone(), self.data_root.clone())
    }
}

fn parse_url(field: &'static str, value: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl { field, source })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::UnsupportedScheme {
            field,
            scheme: url.scheme().to_string(),
        });
    }
    Ok(url)
}

/// Which root directory a file lives under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    /// Safe to delete at any time.
    Cache,
    /// User data that must survive cache clears.
    Data,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemPaths {
    pub cache: PathBuf,
    pub data: PathBuf,
}

impl SystemPaths {
    pub fn new(cache: impl Into<PathBuf>, data: impl Into<PathBuf>) -> Self {
        Self {
            cache: cache.into(),
            data: data.into(),
        }
    }

    pub fn get(&self, category: Category) -> &Path {
        match category {
            Category::Cache => &self.cache,
            Category::Data => &self.data,
        }
    }
}
