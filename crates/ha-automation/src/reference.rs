//! Reference resolution
//!
//! Two substitution forms are supported against a context map:
//!
//! - `$key` as the whole value is replaced by the referenced value itself
//! - `${key}` embedded in text is replaced by the referenced scalar
//!
//! A key may navigate into structured values with `.field` and `[index]`
//! segments, e.g. `$sensor.readings[0].value`.

use ha_core::Configuration;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Read access to a context map
pub trait ContextLookup {
    fn lookup(&self, key: &str) -> Option<&Value>;
}

impl ContextLookup for HashMap<String, Value> {
    fn lookup(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl ContextLookup for Map<String, Value> {
    fn lookup(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

/// Whether `value` is exactly one `$key` reference
///
/// A second `$` anywhere after the first makes it free text.
pub fn is_single_reference(value: &str) -> bool {
    value.len() > 1
        && value.starts_with('$')
        && !value.starts_with("${")
        && !value[1..].contains('$')
}

/// Whether `value` contains at least one `${` opener
pub fn has_pattern(value: &str) -> bool {
    value.contains("${")
}

/// Resolve a value against `context`
///
/// Strings are substituted; arrays and objects are resolved element-wise.
/// Unresolvable single references pass through unchanged.
pub fn resolve_value(value: &Value, context: &dyn ContextLookup) -> Value {
    match value {
        Value::String(text) if is_single_reference(text) => {
            resolve_key(&text[1..], context).unwrap_or_else(|| value.clone())
        }
        Value::String(text) if has_pattern(text) => Value::String(resolve_pattern(text, context)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, context))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve every value of a module configuration
pub fn resolve_configuration(config: &Configuration, context: &dyn ContextLookup) -> Configuration {
    config
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, context)))
        .collect()
}

/// Look up a key, navigating into nested values when no exact entry exists
///
/// Longer prefixes win: for `a.b.c` the candidates are `a.b.c`, then `a.b`
/// with path `.c`, then `a` with path `.b.c`.
pub fn resolve_key(key: &str, context: &dyn ContextLookup) -> Option<Value> {
    if let Some(value) = context.lookup(key) {
        return Some(value.clone());
    }

    key.char_indices()
        .filter(|(_, c)| *c == '.' || *c == '[')
        .map(|(i, _)| i)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .filter(|&split| split > 0)
        .find_map(|split| {
            let (head, path) = key.split_at(split);
            context
                .lookup(head)
                .and_then(|value| resolve_path(value, path))
        })
}

/// Substitute every `${key}` token in `text`
///
/// Missing keys and non-scalar values leave the token as written. An
/// unterminated `${` keeps the rest of the text verbatim.
pub fn resolve_pattern(text: &str, context: &dyn ContextLookup) -> String {
    let mut resolved = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        resolved.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find('}') else {
            resolved.push_str(&rest[start..]);
            return resolved;
        };

        let key = &after_open[..end];
        match resolve_key(key, context).as_ref().and_then(scalar_text) {
            Some(text) => resolved.push_str(&text),
            None => resolved.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after_open[end + 1..];
    }

    resolved.push_str(rest);
    resolved
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Field(&'a str),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = path;

    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot.find(&['.', '['][..]).unwrap_or(after_dot.len());
            if end == 0 {
                return None;
            }
            segments.push(Segment::Field(&after_dot[..end]));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let end = after_bracket.find(']')?;
            segments.push(Segment::Index(after_bracket[..end].trim().parse().ok()?));
            rest = &after_bracket[end + 1..];
        } else {
            return None;
        }
    }

    Some(segments)
}

/// Whether `path` is a well-formed `.field[index]` path
pub fn is_valid_path(path: &str) -> bool {
    parse_path(path).is_some()
}

/// Navigate into `value` along a `.field[index]` path
pub fn resolve_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in parse_path(path)? {
        current = match segment {
            Segment::Field(name) => current.as_object()?.get(name)?,
            Segment::Index(index) => current.as_array()?.get(index)?,
        };
    }
    Some(current.clone())
}
