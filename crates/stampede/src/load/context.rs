//! Per-user variable bag and `{{name}}` interpolation

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use uuid::Uuid;

static TEMPLATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("template token pattern is valid"));

/// Variables owned by exactly one virtual user
///
/// Seeded with a unique `user_id`. Extraction rules write into it and later
/// steps read from it through interpolation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    vars: HashMap<String, Value>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        let mut vars = HashMap::new();
        vars.insert(
            "user_id".to_string(),
            Value::String(format!("user_{}", Uuid::now_v7().simple())),
        );
        Self { vars }
    }

    /// Context with no seeded variables
    pub fn empty() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replace every `{{name}}` with the variable's value. Unknown or null
    /// variables leave the token untouched.
    pub fn interpolate(&self, template: &str) -> String {
        TEMPLATE_TOKEN
            .replace_all(template, |caps: &Captures| match self.vars.get(&caps[1]) {
                Some(value) if !value.is_null() => render_value(value),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Interpolate every string inside a JSON value, keys included
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.interpolate(k), self.interpolate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn interpolate_headers(&self, headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}

/// Text form of a value: strings unquoted, null empty, everything else as JSON
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Follow a dot path through objects and arrays (`items.0.id`)
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
