//! Pipeline definitions and jar specs as they appear in configuration.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FlowError;

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// A reference to a registered jar plus its use-site options.
///
/// Everything except `jar`, `name` and `enabled` is kept in `options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JarSpec {
    /// Registered jar name.
    pub jar: String,

    /// Instance alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl JarSpec {
    pub fn new(jar: impl Into<String>) -> Self {
        Self {
            jar: jar.into(),
            name: None,
            enabled: true,
            options: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Parses a spec from a JSON object.
    pub fn from_value(value: Value) -> Result<Self, FlowError> {
        serde_json::from_value(value).map_err(|e| FlowError::config(e.to_string()))
    }

    /// The alias if present, the jar name otherwise.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.jar)
    }

    /// Fills in options absent at the use site from `defaults`.
    ///
    /// Nested objects are merged recursively; use-site values win.
    pub fn with_defaults(&self, defaults: &Map<String, Value>) -> Self {
        let mut merged = Value::Object(defaults.clone());
        deep_merge(&mut merged, Value::Object(self.options.clone()));
        let options = match merged {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            options,
            ..self.clone()
        }
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn str_option(&self, key: &str) -> Result<Option<&str>, FlowError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(FlowError::invalid(key, "expected a string")),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str, FlowError> {
        self.str_option(key)?.ok_or_else(|| FlowError::missing(key))
    }

    pub fn i64_option(&self, key: &str) -> Result<Option<i64>, FlowError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| FlowError::invalid(key, "expected an integer")),
        }
    }

    pub fn f64_option(&self, key: &str) -> Result<Option<f64>, FlowError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| FlowError::invalid(key, "expected a number")),
        }
    }

    pub fn bool_option(&self, key: &str) -> Result<Option<bool>, FlowError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(FlowError::invalid(key, "expected a boolean")),
        }
    }

    /// A list of strings; absent means empty.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>, FlowError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Ok(other.to_string()),
                })
                .collect(),
            Some(_) => Err(FlowError::invalid(key, "expected a list")),
        }
    }

    pub fn duration_option(&self, key: &str) -> Result<Option<Duration>, FlowError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|ms| Some(Duration::from_millis(ms)))
                .ok_or_else(|| FlowError::invalid(key, "expected a non-negative duration")),
            Some(Value::String(s)) => parse_duration(s)
                .map(Some)
                .map_err(|reason| FlowError::invalid(key, reason)),
            Some(_) => Err(FlowError::invalid(key, "expected a duration")),
        }
    }

    pub fn require_duration(&self, key: &str) -> Result<Duration, FlowError> {
        self.duration_option(key)?
            .ok_or_else(|| FlowError::missing(key))
    }

    /// Deserializes an option into `T`.
    pub fn typed_option<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, FlowError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| FlowError::invalid(key, e.to_string())),
        }
    }

    /// A nested list of jar specs, e.g. the candidates of `oneOf`.
    pub fn spec_list(&self, key: &str) -> Result<Option<Vec<JarSpec>>, FlowError> {
        self.typed_option(key)
    }

    /// A nested pipeline definition.
    pub fn definition_option(&self, key: &str) -> Result<Option<PipelineDefinition>, FlowError> {
        self.typed_option(key)
    }
}

/// A pipeline: one source followed by an ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Name of a recipe this definition extends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<JarSpec>,

    #[serde(default, alias = "transmutes", skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<JarSpec>,
}

impl Default for PipelineDefinition {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            recipe: None,
            source: None,
            transforms: Vec::new(),
        }
    }
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, source: JarSpec) -> Self {
        Self {
            name: Some(name.into()),
            enabled: true,
            recipe: None,
            source: Some(source),
            transforms: Vec::new(),
        }
    }

    /// A definition that only names a recipe.
    pub fn from_recipe(name: impl Into<String>, recipe: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            enabled: true,
            recipe: Some(recipe.into()),
            source: None,
            transforms: Vec::new(),
        }
    }

    pub fn with_transform(mut self, spec: JarSpec) -> Self {
        self.transforms.push(spec);
        self
    }

    pub fn from_value(value: Value) -> Result<Self, FlowError> {
        serde_json::from_value(value).map_err(|e| FlowError::config(e.to_string()))
    }

    pub fn to_value(&self) -> Result<Value, FlowError> {
        serde_json::to_value(self).map_err(FlowError::from)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

/// Merges `overlay` into `base`: objects recursively, anything else replaced.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Parses durations such as `500ms`, `1s`, `1.5S`, `2m`, `1h30m` or `PT1S`.
///
/// A bare integer is taken as milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(ms) = trimmed.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let lower = trimmed.to_ascii_lowercase();
    let mut rest = lower.strip_prefix("pt").unwrap_or(&lower);
    let mut total = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration '{}'", input));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration '{}'", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ms" => number / 1000.0,
            "s" => number,
            "m" => number * 60.0,
            "h" => number * 3600.0,
            "" => return Err(format!("missing unit in duration '{}'", input)),
            unit => return Err(format!("unknown duration unit '{}'", unit)),
        };
        total += seconds;
        rest = &rest[unit_len..];
    }

    Duration::try_from_secs_f64(total)
        .map_err(|_| format!("duration '{}' is out of range", input))
}
