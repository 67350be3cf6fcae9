//! Rule definition
//!
//! A rule ties together triggers, conditions, and actions. Its module lists
//! are fixed once the rule is handed to the engine; changing a rule means
//! replacing it wholesale.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::module::{Configuration, Module, ModuleKind};

/// Visibility of a rule in user interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
    Expert,
}

/// A complete rule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier (auto-generated if not provided)
    #[serde(default = "generate_uid")]
    pub uid: String,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub visibility: Visibility,

    /// Rule-level configuration, referenced from module configuration
    #[serde(default)]
    pub configuration: Configuration,

    /// Template the rule is materialized from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_uid: Option<String>,

    #[serde(default, alias = "trigger")]
    pub triggers: Vec<Module>,

    #[serde(default, alias = "condition")]
    pub conditions: Vec<Module>,

    #[serde(default, alias = "action")]
    pub actions: Vec<Module>,
}

fn generate_uid() -> String {
    ulid::Ulid::new().to_string()
}

impl Rule {
    /// Create an empty rule; a ULID is generated when `uid` is `None`
    pub fn new(uid: Option<String>) -> Self {
        Self {
            uid: uid.unwrap_or_else(generate_uid),
            name: None,
            description: None,
            tags: BTreeSet::new(),
            visibility: Visibility::Visible,
            configuration: Configuration::new(),
            template_uid: None,
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
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

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_template(mut self, template_uid: impl Into<String>) -> Self {
        self.template_uid = Some(template_uid.into());
        self
    }

    /// Get display name (name or UID)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uid)
    }

    /// True when the rule declares no modules of its own
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty() && self.conditions.is_empty() && self.actions.is_empty()
    }

    /// All modules in declaration order, tagged with their role
    pub fn modules(&self) -> impl Iterator<Item = (ModuleKind, &Module)> {
        self.triggers
            .iter()
            .map(|m| (ModuleKind::Trigger, m))
            .chain(self.conditions.iter().map(|m| (ModuleKind::Condition, m)))
            .chain(self.actions.iter().map(|m| (ModuleKind::Action, m)))
    }

    /// Find a module by id
    pub fn module(&self, id: &str) -> Option<(ModuleKind, &Module)> {
        self.modules().find(|(_, m)| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_from_json() {
        let rule: Rule = serde_json::from_value(json!({
            "uid": "hall_light",
            "name": "Hall light",
            "triggers": [{"id": "t1", "type": "core.ItemStateChangeTrigger"}],
            "conditions": [{"id": "c1", "type": "core.Compare", "inputs": {"left": "t1.state"}}],
            "actions": [{"id": "a1", "type": "core.ItemCommandAction"}]
        }))
        .unwrap();

        assert_eq!(rule.display_name(), "Hall light");
        assert_eq!(rule.modules().count(), 3);
        assert_eq!(rule.module("c1").unwrap().0, ModuleKind::Condition);
        assert_eq!(rule.visibility, Visibility::Visible);
    }

    #[test]
    fn test_auto_generated_uid() {
        let rule: Rule = serde_json::from_value(json!({"name": "No UID"})).unwrap();
        // ULID format check
        assert_eq!(rule.uid.len(), 26);

        let rule = Rule::new(None);
        assert_eq!(rule.uid.len(), 26);
        assert!(rule.is_empty());
    }
}
