//! Configuration for the automation server
//!
//! Settings are read from `automation.yaml` in a config directory. The YAML
//! loader understands these tags:
//!
//! - `!secret key` - substitute from `secrets.yaml`
//! - `!env_var NAME [default]` - substitute an environment variable
//! - `!include path` - inline another YAML file
//!
//! # Example
//!
//! ```ignore
//! use crm_config::AppConfig;
//!
//! let config = AppConfig::load("/etc/crm")?;
//! let interval = config.engine.poll_interval();
//! ```

mod app_config;
mod error;
mod loader;
mod secrets;

pub use app_config::{
    AppConfig, EngineConfig, LoggingConfig, StorageConfig, CONFIG_FILE, MAX_POLL_INTERVAL_SECS,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;
