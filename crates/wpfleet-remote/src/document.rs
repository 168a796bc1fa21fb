//! In-memory form of a remote compose document.
//!
//! Sections and keys are dot-separated paths. A section names a mapping
//! reachable from the document root (`services.wordpress`); a key names a
//! value below that section (`environment.WORDPRESS_DEBUG`).
//!
//! Compose lets `environment` be written either as a mapping or as a list
//! of `NAME=value` strings. When the last step of a key lands on such a
//! list, the accessors treat it like a mapping and keep the list form.

use serde_yaml::{Mapping, Sequence, Value};

use crate::error::DocumentError;

/// A parsed YAML document whose root is a mapping (or empty).
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Value,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            root: Value::Mapping(Mapping::new()),
        }
    }
}

impl ConfigDocument {
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let root: Value =
            serde_yaml::from_str(text).map_err(|e| DocumentError::Parse(e.to_string()))?;
        match root {
            Value::Null => Ok(Self::default()),
            Value::Mapping(_) => Ok(Self { root }),
            other => Err(DocumentError::Parse(format!(
                "top level must be a mapping, found {}",
                kind_of(&other)
            ))),
        }
    }

    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        serde_yaml::to_string(&self.root).map_err(|e| DocumentError::Serialize(e.to_string()))
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Top-level keys in document order.
    pub fn sections(&self) -> Vec<String> {
        self.root
            .as_mapping()
            .map(|m| m.keys().map(scalar_string).collect())
            .unwrap_or_default()
    }

    pub fn has_section(&self, section: &str) -> bool {
        walk(&self.root, &segments(section)).is_some_and(Value::is_mapping)
    }

    /// Value at `key` inside `section`.
    pub fn get(&self, section: &str, key: &str) -> Result<Value, DocumentError> {
        let sec = walk(&self.root, &segments(section))
            .ok_or_else(|| DocumentError::NotFound(format!("section {section}")))?;
        let path = segments(key);
        let (last, parents) = split_last(&path, key)?;
        let not_found = || DocumentError::NotFound(format!("{section}.{key}"));
        let container = walk(sec, parents).ok_or_else(not_found)?;

        match container {
            Value::Mapping(m) => m.get(*last).cloned().ok_or_else(not_found),
            Value::Sequence(seq) if is_env_list(container_name(section, parents), seq) => env_get(seq, last)
                .map(|v| Value::String(v.to_string()))
                .ok_or_else(not_found),
            _ => Err(not_found()),
        }
    }

    /// Set `key` inside `section`, creating missing mappings on the way.
    /// Returns the previous value, if any.
    pub fn set(
        &mut self,
        section: &str,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>, DocumentError> {
        let path = segments(key);
        let (last, parents) = split_last(&path, key)?;
        let mut full: Vec<&str> = segments(section);
        full.extend_from_slice(parents);
        let container = walk_create(&mut self.root, &full)?;

        match container {
            Value::Sequence(seq) if is_env_list(full.last().copied(), seq) => {
                Ok(env_set(seq, last, &value))
            }
            Value::Mapping(m) => Ok(m.insert(Value::String(last.to_string()), value)),
            _ => Err(DocumentError::NotAMapping(full.join("."))),
        }
    }

    /// Remove `key` from `section`, returning the removed value.
    pub fn delete_key(&mut self, section: &str, key: &str) -> Result<Value, DocumentError> {
        let sec = walk_mut(&mut self.root, &segments(section))
            .ok_or_else(|| DocumentError::NotFound(format!("section {section}")))?;
        let path = segments(key);
        let (last, parents) = split_last(&path, key)?;
        let not_found = || DocumentError::NotFound(format!("{section}.{key}"));
        let container = walk_mut(sec, parents).ok_or_else(not_found)?;

        match container {
            Value::Mapping(m) => m.shift_remove(*last).ok_or_else(not_found),
            Value::Sequence(seq) if is_env_list(container_name(section, parents), seq) => {
                env_remove(seq, last).ok_or_else(not_found)
            }
            _ => Err(not_found()),
        }
    }

    /// Remove a whole section, returning it.
    pub fn delete_section(&mut self, section: &str) -> Result<Value, DocumentError> {
        let path = segments(section);
        let (last, parents) = split_last(&path, section)?;
        let not_found = || DocumentError::NotFound(format!("section {section}"));
        walk_mut(&mut self.root, parents)
            .and_then(Value::as_mapping_mut)
            .and_then(|m| m.shift_remove(*last))
            .ok_or_else(not_found)
    }
}

/// Interpret a command-line value as YAML: `true`, `8080`, `[a, b]` keep
/// their types, anything that does not parse stays a string.
pub fn parse_value(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Null) if !raw.trim().is_empty() && raw.trim() != "null" && raw.trim() != "~" => {
            Value::String(raw.to_string())
        }
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

fn split_last<'p, 'a>(
    path: &'p [&'a str],
    raw: &str,
) -> Result<(&'p &'a str, &'p [&'a str]), DocumentError> {
    path.split_last()
        .ok_or_else(|| DocumentError::NotFound(format!("empty path {raw:?}")))
}

fn walk<'v>(mut node: &'v Value, path: &[&str]) -> Option<&'v Value> {
    for seg in path {
        node = node.as_mapping()?.get(*seg)?;
    }
    Some(node)
}

fn walk_mut<'v>(mut node: &'v mut Value, path: &[&str]) -> Option<&'v mut Value> {
    for seg in path {
        node = node.as_mapping_mut()?.get_mut(*seg)?;
    }
    Some(node)
}

fn walk_create<'v>(mut node: &'v mut Value, path: &[&str]) -> Result<&'v mut Value, DocumentError> {
    for (i, seg) in path.iter().enumerate() {
        if node.is_null() {
            *node = Value::Mapping(Mapping::new());
        }
        let map = node
            .as_mapping_mut()
            .ok_or_else(|| DocumentError::NotAMapping(path[..i].join(".")))?;
        node = map
            .entry(Value::String(seg.to_string()))
            .or_insert(Value::Null);
    }
    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    Ok(node)
}

/// Last path segment naming the node that holds the final key.
fn container_name<'a>(section: &'a str, parents: &[&'a str]) -> Option<&'a str> {
    parents
        .last()
        .copied()
        .or_else(|| segments(section).last().copied())
}

/// Compose `environment:` lists, or any list made only of `KEY=value` lines.
fn is_env_list(name: Option<&str>, seq: &Sequence) -> bool {
    let strings = seq.iter().all(Value::is_string);
    if name == Some("environment") {
        return strings;
    }
    strings
        && !seq.is_empty()
        && seq
            .iter()
            .filter_map(Value::as_str)
            .all(|item| item.contains('='))
}

fn env_entry<'s>(item: &'s str, name: &str) -> Option<&'s str> {
    match item.strip_prefix(name) {
        Some("") => Some(""),
        Some(rest) => rest.strip_prefix('='),
        None => None,
    }
}

fn env_get<'s>(seq: &'s Sequence, name: &str) -> Option<&'s str> {
    seq.iter()
        .filter_map(Value::as_str)
        .find_map(|item| env_entry(item, name))
}

fn env_set(seq: &mut Sequence, name: &str, value: &Value) -> Option<Value> {
    let line = Value::String(format!("{name}={}", scalar_string(value)));
    for item in seq.iter_mut() {
        let previous = item
            .as_str()
            .and_then(|s| env_entry(s, name))
            .map(|v| Value::String(v.to_string()));
        if previous.is_some() {
            *item = line;
            return previous;
        }
    }
    seq.push(line);
    None
}

fn env_remove(seq: &mut Sequence, name: &str) -> Option<Value> {
    let idx = seq
        .iter()
        .position(|item| item.as_str().and_then(|s| env_entry(s, name)).is_some())?;
    let removed = seq.remove(idx);
    removed
        .as_str()
        .and_then(|s| env_entry(s, name))
        .map(|v| Value::String(v.to_string()))
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
