//! Module type metadata
//!
//! A module type is the schema a module instantiates: its declared inputs
//! and outputs, each with a type name and a tag set used for auto-mapping.
//! Module types are supplied by a registry and never mutated by the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::module::{Module, ModuleKind};

/// Input type name that accepts any output type
pub const WILDCARD_TYPE: &str = "*";

/// Declared input of a condition or action type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub name: String,

    /// Declared type name
    #[serde(rename = "type", default = "wildcard")]
    pub type_name: String,

    /// Whether the input must be connected for the rule to be valid
    #[serde(default)]
    pub required: bool,

    /// Tags used to auto-map the input to an output
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl Input {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            required: false,
            tags: BTreeSet::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Declared output of a trigger or action type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,

    /// Declared type name
    #[serde(rename = "type", default = "wildcard")]
    pub type_name: String,

    /// Tags describing the produced value
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl Output {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

fn wildcard() -> String {
    WILDCARD_TYPE.to_string()
}

/// Schema of a trigger, condition or action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleType {
    pub uid: String,

    /// Whether this is a trigger, condition or action type
    pub kind: ModuleKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordered input definitions (conditions and actions only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,

    /// Ordered output definitions (triggers and actions only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Output>,

    /// Child modules of a composite type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Module>,
}

impl ModuleType {
    pub fn new(uid: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            uid: uid.into(),
            kind,
            label: None,
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn trigger(uid: impl Into<String>) -> Self {
        Self::new(uid, ModuleKind::Trigger)
    }

    pub fn condition(uid: impl Into<String>) -> Self {
        Self::new(uid, ModuleKind::Condition)
    }

    pub fn action(uid: impl Into<String>) -> Self {
        Self::new(uid, ModuleKind::Action)
    }

    pub fn with_input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_child(mut self, child: Module) -> Self {
        self.children.push(child);
        self
    }

    /// Composite types are backed by a nested set of child modules
    pub fn is_composite(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_module_type_from_json() {
        let module_type: ModuleType = serde_json::from_value(json!({
            "uid": "sensor.TemperatureTrigger",
            "kind": "trigger",
            "outputs": [
                {"name": "value", "type": "Decimal", "tags": ["temperature"]}
            ]
        }))
        .unwrap();

        assert_eq!(module_type.kind, ModuleKind::Trigger);
        let output = module_type.output("value").unwrap();
        assert_eq!(output.type_name, "Decimal");
        assert!(output.tags.contains("temperature"));
        assert!(!module_type.is_composite());
    }

    #[test]
    fn test_input_defaults_to_wildcard() {
        let input: Input = serde_json::from_value(json!({"name": "in"})).unwrap();
        assert_eq!(input.type_name, WILDCARD_TYPE);
        assert!(!input.required);
        assert!(input.tags.is_empty());
    }

    #[test]
    fn test_composite_detection() {
        let composite = ModuleType::action("scene.Activate")
            .with_child(Module::new("dim", "light.Dim"))
            .with_child(Module::new("notify", "notify.Send"));
        assert!(composite.is_composite());
    }
}
