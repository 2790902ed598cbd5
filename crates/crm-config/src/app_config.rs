//! Typed server configuration from `automation.yaml`

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

/// Configuration file name inside the config directory
pub const CONFIG_FILE: &str = "automation.yaml";

/// Longest allowed poll interval
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;

/// Rule engine tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between polls of scheduled rules
    pub poll_interval_secs: u64,

    /// Rules executed concurrently within one poll
    pub max_concurrent_rules: usize,

    /// Recipients per email batch call
    pub email_batch_size: usize,

    /// Pause between SMS sends
    pub sms_delay_ms: u64,

    /// Pause between WhatsApp sends
    pub whatsapp_delay_ms: u64,

    /// Fixed calendar offset east of UTC; the host zone when absent
    pub utc_offset_minutes: Option<i32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_concurrent_rules: 4,
            email_batch_size: 1000,
            sms_delay_ms: 100,
            whatsapp_delay_ms: 1000,
            utc_offset_minutes: None,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sms_delay(&self) -> Duration {
        Duration::from_millis(self.sms_delay_ms)
    }

    pub fn whatsapp_delay(&self) -> Duration {
        Duration::from_millis(self.whatsapp_delay_ms)
    }
}

/// Where rules, execution history and customer data live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Relative paths resolve against the config directory
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".storage"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load `automation.yaml` from a config directory
    ///
    /// A missing file yields the defaults.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.join(CONFIG_FILE).exists() {
            info!(dir = %config_dir.display(), "No {} found, using defaults", CONFIG_FILE);
            return Ok(Self::default());
        }

        let yaml = YamlLoader::new(config_dir)?.load_file(CONFIG_FILE)?;
        Self::from_yaml(yaml)
    }

    /// Parse and validate an already loaded document
    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        let config: AppConfig = match yaml {
            Value::Null => Self::default(),
            yaml => serde_yaml::from_value(yaml).map_err(|e| ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: e.to_string(),
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> ConfigResult<()> {
        let engine = &self.engine;
        if !(1..=MAX_POLL_INTERVAL_SECS).contains(&engine.poll_interval_secs) {
            return Err(invalid(
                "engine.poll_interval_secs",
                format!("must be between 1 and {}", MAX_POLL_INTERVAL_SECS),
            ));
        }
        if engine.max_concurrent_rules == 0 {
            return Err(invalid("engine.max_concurrent_rules", "must be at least 1"));
        }
        if engine.email_batch_size == 0 {
            return Err(invalid("engine.email_batch_size", "must be at least 1"));
        }
        if let Some(offset) = engine.utc_offset_minutes {
            if offset.abs() >= 24 * 60 {
                return Err(invalid(
                    "engine.utc_offset_minutes",
                    "must be within one day of UTC",
                ));
            }
        }
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }

    /// Storage directory resolved against the config directory
    pub fn storage_dir(&self, config_dir: impl AsRef<Path>) -> PathBuf {
        if self.storage.dir.is_absolute() {
            self.storage.dir.clone()
        } else {
            config_dir.as_ref().join(&self.storage.dir)
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}
