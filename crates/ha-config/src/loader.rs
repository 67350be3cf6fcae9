//! YAML loader for automation files
//!
//! Custom tags:
//! - `!include path` - Replace the node with the contents of another YAML file,
//!   resolved relative to the including file
//! - `!env_var NAME [default]` - Substitute an environment variable, falling back
//!   to the default when given

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const INCLUDE_TAG: &str = "include";
const ENV_VAR_TAG: &str = "env_var";

/// YAML loader that expands `!include` and `!env_var`
pub struct YamlLoader {
    /// Base directory for top-level relative paths
    config_dir: PathBuf,
    /// Files currently being loaded, outermost first
    include_chain: Vec<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            include_chain: Vec::new(),
        }
    }

    /// Load a file and expand every custom tag in it
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        if self.include_chain.contains(&path) {
            let mut chain = self.include_chain.clone();
            chain.push(path);
            return Err(ConfigError::CircularInclude { chain });
        }

        debug!(path = %path.display(), "Loading YAML file");
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_chain.push(path.clone());
        let result = self.load_str(&content, &path);
        self.include_chain.pop();
        result
    }

    /// Parse YAML text and expand its tags; includes resolve relative to `source_path`
    pub fn load_str(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.expand(value, source_path)
    }

    fn expand(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.expand_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut expanded = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    expanded.insert(key, self.expand(value, source_path)?);
                }
                Ok(Value::Mapping(expanded))
            }
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.expand(item, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn expand_tagged(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        trace!(tag = %tagged.tag, "Expanding tagged value");

        if tagged.tag == INCLUDE_TAG {
            let target = self.include_target(&tagged.value, source_path)?;
            if !target.exists() {
                return Err(ConfigError::IncludeNotFound { path: target });
            }
            return self.load_file(target);
        }

        if tagged.tag == ENV_VAR_TAG {
            return env_var_value(&tagged.value);
        }

        // Unknown tags stay in the document for the consumer to interpret
        Ok(Value::Tagged(Box::new(TaggedValue {
            tag: tagged.tag,
            value: self.expand(tagged.value, source_path)?,
        })))
    }

    fn include_target(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(raw) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{:?}", value),
                reason: "path must be a string".to_string(),
            });
        };
        if raw.trim().is_empty() {
            return Err(ConfigError::InvalidIncludePath {
                path: raw.clone(),
                reason: "path is empty".to_string(),
            });
        }

        let target = Path::new(raw.trim());
        if target.is_absolute() {
            return Ok(target.to_path_buf());
        }
        let base = source_path.parent().unwrap_or(&self.config_dir);
        Ok(base.join(target))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// Resolve `NAME [default]`
fn env_var_value(value: &Value) -> ConfigResult<Value> {
    let Value::String(spec) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "expected 'NAME [default]'".to_string(),
        });
    };

    let spec = spec.trim();
    let (name, default) = match spec.split_once(char::is_whitespace) {
        Some((name, default)) => (name, Some(default.trim())),
        None => (spec, None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => {
            debug!(var = name, "Substituted environment variable");
            Ok(Value::String(value))
        }
        // Let YAML decide whether the default is a number, bool or string
        (Err(_), Some(default)) => Ok(serde_yaml::from_str(default)
            .unwrap_or_else(|_| Value::String(default.to_string()))),
        (Err(_), None) => Err(ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// Load a YAML file relative to `config_dir` with tag expansion
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value.as_mapping().unwrap().get(key).unwrap()
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "rules/lights.yaml", "- uid: lights\n");
        write_file(dir.path(), "rules/all.yaml", "!include lights.yaml\n");
        write_file(dir.path(), "automation.yaml", "rules: !include rules/all.yaml\n");

        let value = load_yaml(dir.path(), "automation.yaml").unwrap();
        let rules = get(&value, "rules").as_sequence().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(get(&rules[0], "uid").as_str(), Some("lights"));
    }

    #[test]
    fn test_include_missing_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "automation.yaml", "rules: !include nope.yaml\n");

        let result = load_yaml(dir.path(), "automation.yaml");
        assert!(matches!(result, Err(ConfigError::IncludeNotFound { .. })));
    }

    #[test]
    fn test_circular_include_reports_chain() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "a: !include a.yaml\n");

        match load_yaml(dir.path(), "a.yaml") {
            Err(ConfigError::CircularInclude { chain }) => {
                assert_eq!(chain.len(), 3);
                assert_eq!(chain.first(), chain.last());
            }
            other => panic!("expected circular include, got {:?}", other),
        }
    }

    #[test]
    fn test_env_var_with_default() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("HA_CONFIG_TEST_DELAY", "250");
        write_file(
            dir.path(),
            "automation.yaml",
            "set: !env_var HA_CONFIG_TEST_DELAY\nfallback: !env_var HA_CONFIG_TEST_UNSET 42\n",
        );

        let value = load_yaml(dir.path(), "automation.yaml").unwrap();
        assert_eq!(get(&value, "set").as_str(), Some("250"));
        assert_eq!(get(&value, "fallback").as_u64(), Some(42));
        std::env::remove_var("HA_CONFIG_TEST_DELAY");
    }

    #[test]
    fn test_env_var_missing() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "automation.yaml",
            "value: !env_var HA_CONFIG_TEST_NEVER_SET\n",
        );

        let result = load_yaml(dir.path(), "automation.yaml");
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound { var }) if var == "HA_CONFIG_TEST_NEVER_SET"));
    }

    #[test]
    fn test_unknown_tag_preserved() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "automation.yaml", "value: !custom thing\n");

        let value = load_yaml(dir.path(), "automation.yaml").unwrap();
        assert!(matches!(get(&value, "value"), Value::Tagged(_)));
    }
}
