//! Type compatibility between module outputs and inputs
//!
//! Type names declared on inputs and outputs are plain strings. Names that
//! are registered here form a subtype relation; names that are not fall back
//! to exact string equality.

use ha_core::WILDCARD_TYPE;
use std::collections::{HashMap, HashSet, VecDeque};

/// Root of the default type table
pub const OBJECT_TYPE: &str = "Object";

const DEFAULT_SUBTYPES: &[(&str, &str)] = &[
    ("String", OBJECT_TYPE),
    ("Number", OBJECT_TYPE),
    ("Integer", "Number"),
    ("Decimal", "Number"),
    ("Boolean", OBJECT_TYPE),
    ("Map", OBJECT_TYPE),
    ("List", OBJECT_TYPE),
    ("State", OBJECT_TYPE),
    ("Command", OBJECT_TYPE),
    ("Event", OBJECT_TYPE),
];

/// Registered type names and their direct supertypes
#[derive(Debug, Clone)]
pub struct TypeCompatibility {
    supertypes: HashMap<String, HashSet<String>>,
}

impl TypeCompatibility {
    /// A table without any known types: only exact names match
    pub fn empty() -> Self {
        Self {
            supertypes: HashMap::new(),
        }
    }

    pub fn register_type(&mut self, name: impl Into<String>) {
        self.supertypes.entry(name.into()).or_default();
    }

    /// Declare `subtype` assignable to `supertype`; both become known types
    pub fn register_subtype(&mut self, subtype: impl Into<String>, supertype: impl Into<String>) {
        let supertype = supertype.into();
        self.register_type(supertype.clone());
        self.supertypes
            .entry(subtype.into())
            .or_default()
            .insert(supertype);
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.supertypes.contains_key(name)
    }

    /// Reflexive, transitive subtype check over known types
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            let Some(parents) = self.supertypes.get(current) else {
                continue;
            };
            for parent in parents {
                if parent == to {
                    return true;
                }
                if seen.insert(parent.as_str()) {
                    queue.push_back(parent.as_str());
                }
            }
        }
        false
    }

    /// Whether an output of `output_type` may feed an input of `input_type`
    pub fn is_compatible(&self, output_type: &str, input_type: &str) -> bool {
        if input_type == WILDCARD_TYPE {
            return true;
        }
        if self.is_known(output_type) && self.is_known(input_type) {
            return self.is_assignable(output_type, input_type);
        }
        output_type == input_type
    }
}

impl Default for TypeCompatibility {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register_type(OBJECT_TYPE);
        for (subtype, supertype) in DEFAULT_SUBTYPES {
            table.register_subtype(*subtype, *supertype);
        }
        table
    }
}
