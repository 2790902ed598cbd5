//! Values referenced by `!secret` tags, read from `secrets.yaml`

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Secret values by key
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
}

impl Secrets {
    /// Load `secrets.yaml` from the config directory; a missing file means no secrets
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join("secrets.yaml");
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No secrets file");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::ReadFile { path, source }),
        };

        let raw: HashMap<String, Value> =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
                path: path.clone(),
                source,
            })?;

        let values: HashMap<String, String> = raw
            .into_iter()
            .map(|(key, value)| (key, scalar_to_string(value)))
            .collect();

        debug!(count = values.len(), "Loaded secrets");
        Ok(Self { values })
    }

    /// Build secrets from key/value pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> ConfigResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_converts_scalars() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("secrets.yaml"),
            "sendgrid_key: SG.abc\nsms_port: 2775\nsandbox: true\n",
        )
        .unwrap();

        let secrets = Secrets::load(dir.path()).unwrap();
        assert_eq!(secrets.len(), 3);
        assert_eq!(secrets.get("sendgrid_key").unwrap(), "SG.abc");
        assert_eq!(secrets.get("sms_port").unwrap(), "2775");
        assert_eq!(secrets.get("sandbox").unwrap(), "true");
        assert!(matches!(
            secrets.get("twilio_token"),
            Err(ConfigError::SecretNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(Secrets::load(dir.path()).unwrap().is_empty());
    }
}
