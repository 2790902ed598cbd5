//! YAML loader with custom tags
//!
//! - `!secret key` substitutes a value from `secrets.yaml`
//! - `!env_var NAME [default]` substitutes an environment variable
//! - `!include path` inlines another YAML file

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Loads YAML files relative to a config directory
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, for cycle detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a loader, reading `secrets.yaml` from the config directory
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    /// Create a loader with pre-loaded secrets
    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_stack: HashSet::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve(path.as_ref(), &self.config_dir);
        debug!(path = %path.display(), "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);
        result
    }

    /// Load and process YAML text; `source` names it in errors and anchors includes
    pub fn load_string(&mut self, content: &str, source: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.process(value, source)
    }

    fn process(&mut self, value: Value, source: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source),
            Value::Mapping(map) => {
                let mut result = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    result.insert(self.process(k, source)?, self.process(v, source)?);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process(v, source))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn process_tagged(&mut self, tagged: TaggedValue, source: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Processing tag");

        match tag.as_str() {
            "!secret" => {
                let key = tag_argument(&tag, &tagged.value)?;
                Ok(Value::String(self.secrets.get(key)?.to_string()))
            }
            "!env_var" => {
                let arg = tag_argument(&tag, &tagged.value)?;
                env_var(arg).map(Value::String)
            }
            "!include" => {
                let arg = tag_argument(&tag, &tagged.value)?;
                let base = source.parent().unwrap_or(&self.config_dir).to_path_buf();
                let path = self.resolve(Path::new(arg), &base);
                self.load_file(path)
            }
            _ => {
                let value = self.process(tagged.value, source)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    fn resolve(&self, path: &Path, base: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

fn tag_argument<'a>(tag: &str, value: &'a Value) -> ConfigResult<&'a str> {
    value.as_str().ok_or_else(|| ConfigError::InvalidValue {
        key: tag.to_string(),
        reason: "argument must be a string".to_string(),
    })
}

/// `NAME` or `NAME default`
fn env_var(arg: &str) -> ConfigResult<String> {
    let mut parts = arg.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let default = parts.next().map(str::trim);

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// Load one YAML file from a config directory with tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}
