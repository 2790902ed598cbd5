//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why `automation.yaml` (or a file it pulls in) could not be turned into an
/// [`AppConfig`](crate::AppConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `!secret` named a key missing from the secrets file
    #[error("no secret named '{key}'")]
    SecretNotFound { key: String },

    /// `!env_var` without a default named an unset variable
    #[error("environment variable '{var}' is unset and has no default")]
    EnvVarNotFound { var: String },

    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    #[error("{key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
