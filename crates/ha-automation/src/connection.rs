//! Input wiring
//!
//! A module input refers either to another module's output
//! (`"moduleId.outputName"`, optionally followed by a nested path such as
//! `"moduleId.outputName.field[0]"`) or directly to a context key
//! (`"$contextKey"`).

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::error::{ConnectionError, ConnectionResult};
use crate::reference;

/// One input-to-output link
///
/// Equality and hashing consider only the input name: an input has at most
/// one connection.
#[derive(Debug, Clone)]
pub struct Connection {
    input_name: String,
    source_module_id: Option<String>,
    output_name: String,
    path: Option<String>,
}

impl Connection {
    /// Link an input to `source_module_id.output_name`
    pub fn to_output(
        input_name: impl Into<String>,
        source_module_id: impl Into<String>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            input_name: input_name.into(),
            source_module_id: Some(source_module_id.into()),
            output_name: output_name.into(),
            path: None,
        }
    }

    /// Link an input to a context key; `reference` keeps its leading `$`
    pub fn to_context(input_name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            input_name: input_name.into(),
            source_module_id: None,
            output_name: reference.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Parse one raw input reference
    pub fn parse(input_name: &str, reference: &str) -> ConnectionResult<Self> {
        if reference == "$" {
            return Err(ConnectionError::EmptyContextKey {
                input: input_name.to_string(),
                reference: reference.to_string(),
            });
        }
        if reference::is_single_reference(reference) {
            return Ok(Self::to_context(input_name, reference));
        }

        let Some((module_id, rest)) = reference.split_once('.') else {
            return Err(ConnectionError::MissingSeparator {
                input: input_name.to_string(),
                reference: reference.to_string(),
            });
        };

        let output_end = rest.find(&['.', '['][..]).unwrap_or(rest.len());
        let (output_name, path) = rest.split_at(output_end);
        if module_id.is_empty() || output_name.is_empty() {
            return Err(ConnectionError::EmptyPart {
                input: input_name.to_string(),
                reference: reference.to_string(),
            });
        }

        if !path.is_empty() && !reference::is_valid_path(path) {
            return Err(ConnectionError::InvalidPath {
                input: input_name.to_string(),
                reference: reference.to_string(),
            });
        }

        let connection = Self::to_output(input_name, module_id, output_name);
        Ok(if path.is_empty() {
            connection
        } else {
            connection.with_path(path)
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn source_module_id(&self) -> Option<&str> {
        self.source_module_id.as_deref()
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Nested path applied to the source output, e.g. `.field[0]`
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn is_context_reference(&self) -> bool {
        self.source_module_id.is_none()
    }

    /// Context key under which the source output is published
    pub fn source_key(&self) -> Option<String> {
        self.source_module_id
            .as_ref()
            .map(|module_id| format!("{}.{}", module_id, self.output_name))
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.input_name == other.input_name
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.input_name.hash(state);
    }
}

impl Borrow<str> for Connection {
    fn borrow(&self) -> &str {
        &self.input_name
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <- ", self.input_name)?;
        if let Some(module_id) = &self.source_module_id {
            write!(f, "{}.", module_id)?;
        }
        write!(f, "{}{}", self.output_name, self.path.as_deref().unwrap_or(""))
    }
}

/// Derive the connection set of a module from its raw input map
pub fn resolve_connections(
    inputs: &HashMap<String, String>,
) -> ConnectionResult<HashSet<Connection>> {
    let mut names: Vec<&String> = inputs.keys().collect();
    names.sort();

    names
        .into_iter()
        .map(|name| Connection::parse(name, &inputs[name]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module_output() {
        let connection = Connection::parse("in", "t1.x").unwrap();
        assert_eq!(connection.input_name(), "in");
        assert_eq!(connection.source_module_id(), Some("t1"));
        assert_eq!(connection.output_name(), "x");
        assert_eq!(connection.path(), None);
        assert_eq!(connection.source_key().as_deref(), Some("t1.x"));
    }

    #[test]
    fn test_parse_context_reference() {
        let connection = Connection::parse("in", "$ctx").unwrap();
        assert!(connection.is_context_reference());
        assert_eq!(connection.output_name(), "$ctx");
        assert_eq!(connection.source_key(), None);
    }

    #[test]
    fn test_parse_nested_path() {
        let connection = Connection::parse("in", "a1.result.items[0].name").unwrap();
        assert_eq!(connection.source_module_id(), Some("a1"));
        assert_eq!(connection.output_name(), "result");
        assert_eq!(connection.path(), Some(".items[0].name"));

        let connection = Connection::parse("in", "a1.list[2]").unwrap();
        assert_eq!(connection.output_name(), "list");
        assert_eq!(connection.path(), Some("[2]"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Connection::parse("in", "noSeparator"),
            Err(ConnectionError::MissingSeparator { .. })
        ));
        assert!(matches!(
            Connection::parse("in", ".x"),
            Err(ConnectionError::EmptyPart { .. })
        ));
        assert!(matches!(
            Connection::parse("in", "t1."),
            Err(ConnectionError::EmptyPart { .. })
        ));
        assert!(matches!(
            Connection::parse("in", "$"),
            Err(ConnectionError::EmptyContextKey { .. })
        ));
        assert!(matches!(
            Connection::parse("in", "t1..x"),
            Err(ConnectionError::EmptyPart { .. })
        ));
        assert!(matches!(
            Connection::parse("in", "t1.x..field"),
            Err(ConnectionError::InvalidPath { .. })
        ));
        assert!(matches!(
            Connection::parse("in", "t1.x."),
            Err(ConnectionError::InvalidPath { .. })
        ));
        assert!(matches!(
            Connection::parse("in", "t1.x[first]"),
            Err(ConnectionError::InvalidPath { .. })
        ));
        // A pattern is not a single reference and has no separator
        assert!(Connection::parse("in", "${ctx}").is_err());
        assert!(matches!(
            Connection::parse("in", "$a ${b}"),
            Err(ConnectionError::MissingSeparator { .. })
        ));
    }

    #[test]
    fn test_equality_by_input_name() {
        let mut set = HashSet::new();
        set.insert(Connection::to_output("in", "t1", "x"));
        assert!(!set.insert(Connection::to_output("in", "t2", "y")));
        assert!(set.contains("in"));
        assert_eq!(set.get("in").unwrap().source_module_id(), Some("t1"));
    }

    #[test]
    fn test_resolve_connections() {
        let inputs = HashMap::from([
            ("a".to_string(), "t1.x".to_string()),
            ("b".to_string(), "$key".to_string()),
        ]);
        let connections = resolve_connections(&inputs).unwrap();
        assert_eq!(connections.len(), 2);

        let bad = HashMap::from([("a".to_string(), "broken".to_string())]);
        assert!(resolve_connections(&bad).is_err());
    }
}
