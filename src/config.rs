//! Operator configuration
//!
//! Settings are read from an optional TOML file; command-line flags are
//! applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperatorConfig {
    pub object_store: ObjectStoreConfig,
    pub bucket_wait: BucketWaitConfig,
    pub backoff: BackoffConfig,
    /// Requeue interval for Stores that reconciled cleanly
    pub resync_secs: u64,
    /// Maximum number of Stores reconciled in parallel (0 = unbounded)
    pub concurrency: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            object_store: ObjectStoreConfig::default(),
            bucket_wait: BucketWaitConfig::default(),
            backoff: BackoffConfig::default(),
            resync_secs: 300,
            concurrency: 4,
        }
    }
}

impl OperatorConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::ConfigError(format!("Invalid config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

/// Where the S3-compatible object store lives
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    /// Region sent as the bucket location constraint; omitted when unset
    pub region: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            region: None,
            request_timeout_secs: 30,
        }
    }
}

/// Bounds for polling a freshly created bucket until it is visible
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BucketWaitConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for BucketWaitConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            max_attempts: 20,
        }
    }
}

impl BucketWaitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Exponential backoff between failed reconciliations of one Store
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: 5,
            max_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OperatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.resync(), Duration::from_secs(300));
        assert_eq!(config.bucket_wait.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = OperatorConfig::from_toml_str(
            r#"
resync_secs = 60

[object_store]
endpoint = "https://s3.eu-west-1.amazonaws.com"
region = "eu-west-1"

[bucket_wait]
max_attempts = 3
"#,
        )
        .unwrap();

        assert_eq!(config.resync_secs, 60);
        assert_eq!(config.object_store.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.object_store.request_timeout_secs, 30);
        assert_eq!(config.bucket_wait.max_attempts, 3);
        assert_eq!(config.bucket_wait.interval_ms, 5000);
        assert_eq!(config.backoff, BackoffConfig::default());
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = OperatorConfig::from_toml_str("resync_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency = 8").unwrap();

        let config = OperatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = OperatorConfig::from_file("/nonexistent/store-operator.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
