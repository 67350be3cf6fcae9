//! YAML configuration loading for the rule engine
//!
//! Loads an automation file with support for two custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!env_var NAME [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use ha_config::AutomationFile;
//!
//! let file = AutomationFile::load("/config/automation.yaml")?;
//! println!("{} rules", file.rules.len());
//! ```

mod engine_config;
mod error;
mod loader;

pub use engine_config::{AutomationFile, EngineConfig, REINITIALIZATION_DELAY_ENV};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
