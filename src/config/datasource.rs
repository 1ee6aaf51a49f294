//! Pooled data source settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// URL scheme accepted by the in-memory store.
pub const URL_SCHEME: &str = "mem:";

/// Settings for a pooled data source.
///
/// Durations are in milliseconds, matching the JSON keys
/// `leakDetectionThreshold` and `connectionTimeout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataSourceConfig {
    /// Store location, e.g. `mem:users`.
    pub url: String,
    /// User the store is owned by.
    pub user: String,
    /// Password for `user`.
    pub password: String,
    /// Maximum number of physical connections.
    pub max_pool_size: usize,
    /// Leases held longer than this are reported as possible leaks.
    pub leak_detection_threshold: u64,
    /// How long `acquire` waits for a free connection.
    pub connection_timeout: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            url: format!("{}default", URL_SCHEME),
            user: "sa".to_string(),
            password: String::new(),
            max_pool_size: 10,
            leak_detection_threshold: 3000,
            connection_timeout: 30_000,
        }
    }
}

impl DataSourceConfig {
    /// Create a configuration with the given location and credentials.
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the leak detection threshold.
    pub fn leak_detection_threshold(mut self, threshold: Duration) -> Self {
        self.leak_detection_threshold = threshold.as_millis() as u64;
        self
    }

    /// Set the acquisition timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout.as_millis() as u64;
        self
    }

    /// Leak detection threshold as a duration.
    pub fn leak_threshold(&self) -> Duration {
        Duration::from_millis(self.leak_detection_threshold)
    }

    /// Acquisition timeout as a duration.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout)
    }

    /// Name of the store the URL points at.
    pub fn database_name(&self) -> Option<&str> {
        self.url.strip_prefix(URL_SCHEME).filter(|name| !name.is_empty())
    }

    /// Reject settings no data source can be built from.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database_name().is_none() {
            return Err(ConfigError::Invalid(format!(
                "url must look like '{}<name>', got '{}'",
                URL_SCHEME, self.url
            )));
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::Invalid("user must not be empty".into()));
        }
        if self.max_pool_size == 0 {
            return Err(ConfigError::Invalid("maxPoolSize must be at least 1".into()));
        }
        Ok(())
    }
}
