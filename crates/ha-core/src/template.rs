//! Rule templates

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::module::{Configuration, Module};

/// A reusable rule skeleton
///
/// Rules referencing a template get the template's modules, with each
/// module's configuration resolved against the rule's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTemplate {
    pub uid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Default values for rule configuration parameters
    #[serde(default)]
    pub config_defaults: Configuration,

    #[serde(default)]
    pub triggers: Vec<Module>,

    #[serde(default)]
    pub conditions: Vec<Module>,

    #[serde(default)]
    pub actions: Vec<Module>,
}

impl RuleTemplate {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            label: None,
            description: None,
            tags: BTreeSet::new(),
            config_defaults: Configuration::new(),
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_trigger(mut self, trigger: Module) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_condition(mut self, condition: Module) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Module) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config_defaults.insert(key.into(), value);
        self
    }
}
