//! Rule modules
//!
//! A module is one trigger, condition or action inside a rule. Conditions
//! and actions additionally declare named inputs wired either to another
//! module's output (`"moduleId.outputName"`) or to a context key (`"$key"`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::{ModelError, ModelResult};

/// Configuration map carried by rules and modules
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// Role of a module inside its rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Trigger,
    Condition,
    Action,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ModuleKind::Trigger => "trigger",
            ModuleKind::Condition => "condition",
            ModuleKind::Action => "action",
        })
    }
}

/// A trigger, condition or action instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Identifier, unique within the owning rule
    pub id: String,

    /// UID of the module type this module instantiates
    #[serde(rename = "type")]
    pub type_uid: String,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Module configuration
    #[serde(default)]
    pub configuration: Configuration,

    /// Named inputs (ignored for triggers)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, String>,
}

impl Module {
    /// Create a module with empty configuration and inputs
    pub fn new(id: impl Into<String>, type_uid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_uid: type_uid.into(),
            label: None,
            description: None,
            configuration: Configuration::new(),
            inputs: HashMap::new(),
        }
    }

    /// Wire an input to `"moduleId.outputName"` or `"$contextKey"`
    pub fn with_input(mut self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), reference.into());
        self
    }

    /// Set a configuration value
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

fn module_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]*$").expect("static module id pattern"))
}

/// Check a module id against the allowed character set
pub fn validate_module_id(id: &str) -> ModelResult<()> {
    if module_id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(ModelError::InvalidModuleId(id.to_string()))
    }
}
