//! Configuration management
//!
//! Transfer tuning, retry policy and the mounts to establish at startup.
//! The configuration file is stored in TOML format at
//! `<config_dir>/objio/config.toml`; `OBJIO_CONFIG_DIR` overrides the
//! directory.
//!
//! PROTECTED FILE: Changes to schema_version require migration support.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::traits::StorageParameters;

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "OBJIO_CONFIG_DIR";

/// Default read-ahead window: 8 MiB
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Default multipart part size: 8 MiB
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Default number of part uploads in flight per handle
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Default metadata cache lifetime in milliseconds
pub const DEFAULT_CACHE_TTL_MS: u64 = 5000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Buffering and caching parameters
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Retry policy for transient read failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Mounts established at startup
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            transfer: TransferConfig::default(),
            retry: RetryConfig::default(),
            mounts: Vec::new(),
        }
    }
}

/// A storage to mount at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Storage name of a registered driver factory, e.g. "s3"
    pub storage: String,

    /// Backend-specific connection parameters
    #[serde(default)]
    pub parameters: StorageParameters,
}

/// Buffering and caching parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Read-ahead window in bytes, when the driver has no preference
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Write flush threshold in bytes, raised to the driver's minimum
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Part uploads in flight per write handle
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Metadata cache lifetime in milliseconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_ms: u64,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

fn default_upload_concurrency() -> usize {
    DEFAULT_UPLOAD_CONCURRENCY
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_MS
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            part_size: default_part_size(),
            upload_concurrency: default_upload_concurrency(),
            cache_ttl_ms: default_cache_ttl(),
        }
    }
}

impl TransferConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Retry configuration for read-ahead fetches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    10000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial backoff
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("objio"),
        };
        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    /// If the schema version doesn't match, attempts migration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade objio.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 600 (owner read/write only), since mount
    /// parameters usually carry credentials.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        Ok(())
    }

    /// Migrate configuration from older schema version
    fn migrate(&self, config: Config) -> Result<Config> {
        let mut config = config;
        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = ConfigManager::with_path(config_path);
        (manager, temp_dir)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert_eq!(config.transfer.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.transfer.part_size, DEFAULT_PART_SIZE);
        assert_eq!(config.transfer.upload_concurrency, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.mounts.is_empty());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let (manager, _temp_dir) = temp_config_manager();
        let config = manager.load().unwrap();
        assert!(config.mounts.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let (manager, _temp_dir) = temp_config_manager();

        let mut config = Config::default();
        config.transfer.part_size = 16 * 1024 * 1024;
        config.mounts.push(MountConfig {
            storage: "s3".to_string(),
            parameters: StorageParameters::new()
                .with("endpoint", "http://localhost:9000")
                .with("access_key", "minioadmin")
                .with("secret_key", "minioadmin"),
        });

        manager.save(&config).unwrap();
        let loaded = manager.load().unwrap();

        assert_eq!(loaded.transfer.part_size, 16 * 1024 * 1024);
        assert_eq!(loaded.mounts, config.mounts);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let (manager, _temp_dir) = temp_config_manager();
        std::fs::write(
            manager.config_path(),
            r#"
            schema_version = 1

            [transfer]
            buffer_size = 1024

            [[mounts]]
            storage = "memory"
            "#,
        )
        .unwrap();

        let config = manager.load().unwrap();
        assert_eq!(config.transfer.buffer_size, 1024);
        assert_eq!(config.transfer.part_size, DEFAULT_PART_SIZE);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.mounts[0].storage, "memory");
        assert!(config.mounts[0].parameters.is_empty());
    }

    #[test]
    fn test_schema_version_too_new() {
        let (manager, _temp_dir) = temp_config_manager();

        let content = format!(
            r#"
            schema_version = {}
            "#,
            SCHEMA_VERSION + 1
        );
        std::fs::write(manager.config_path(), content).unwrap();

        let result = manager.load();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("newer than supported"));
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(350));
        assert_eq!(retry.backoff(40), Duration::from_millis(350));
    }
}
