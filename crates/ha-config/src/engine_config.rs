//! Automation file and engine settings
//!
//! An automation file is a YAML document with four optional sections:
//!
//! ```yaml
//! engine:
//!   reinitialization_delay_ms: 500
//! module_types: [...]
//! templates: [...]
//! rules: [...]
//! ```

use ha_core::{ModuleType, Rule, RuleTemplate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

/// Environment variable overriding the re-initialization delay
pub const REINITIALIZATION_DELAY_ENV: &str = "AUTOMATION_REINITIALIZATION_DELAY_MS";

/// Rule engine settings from the `engine:` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay before a rule stuck on missing handlers is initialized again
    #[serde(
        default = "default_reinitialization_delay_ms",
        deserialize_with = "u64_or_numeric_string"
    )]
    pub reinitialization_delay_ms: u64,
}

fn default_reinitialization_delay_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reinitialization_delay_ms: default_reinitialization_delay_ms(),
        }
    }
}

impl EngineConfig {
    pub fn reinitialization_delay(&self) -> Duration {
        Duration::from_millis(self.reinitialization_delay_ms)
    }

    /// Apply `AUTOMATION_REINITIALIZATION_DELAY_MS` when it holds a valid number
    pub fn apply_env_overrides(mut self) -> ConfigResult<Self> {
        if let Ok(raw) = std::env::var(REINITIALIZATION_DELAY_ENV) {
            self.reinitialization_delay_ms =
                raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: REINITIALIZATION_DELAY_ENV.to_string(),
                    reason: format!("'{}' is not a number of milliseconds", raw),
                })?;
        }
        Ok(self)
    }
}

// `!env_var` always substitutes strings
fn u64_or_numeric_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parsed automation file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationFile {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub module_types: Vec<ModuleType>,

    #[serde(default)]
    pub templates: Vec<RuleTemplate>,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl AutomationFile {
    /// Load an automation file, expanding tags and applying env overrides
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let value = YamlLoader::new(config_dir).load_file(path)?;

        let mut file = Self::from_yaml(value).map_err(|source| ConfigError::InvalidDocument {
            path: path.to_path_buf(),
            source,
        })?;
        file.engine = file.engine.apply_env_overrides()?;
        Ok(file)
    }

    /// Build from an already expanded YAML value; an empty document is an empty file
    pub fn from_yaml(value: Value) -> Result<Self, serde_yaml::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value)
    }
}
