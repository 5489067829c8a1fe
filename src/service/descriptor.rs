//! Static identity and option schema of a service implementation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Type of a configuration option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    /// JSON string
    String,
    /// Whole number (signed or unsigned)
    Integer,
    /// Any number
    Float,
    /// `true` / `false`
    Boolean,
    /// JSON array
    List,
    /// JSON object
    Map,
    /// Anything, unchecked
    Any,
}

impl OptionKind {
    /// Whether `value` has this kind.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            OptionKind::String => value.is_string(),
            OptionKind::Integer => value.is_i64() || value.is_u64(),
            OptionKind::Float => value.is_number(),
            OptionKind::Boolean => value.is_boolean(),
            OptionKind::List => value.is_array(),
            OptionKind::Map => value.is_object(),
            OptionKind::Any => true,
        }
    }
}

/// Declaration of a single option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Expected type
    pub kind: OptionKind,
    /// Value used when the option is absent
    pub default: Option<Value>,
    /// Absence is an error (only meaningful without a default)
    pub required: bool,
    /// Human-readable description
    pub description: String,
}

/// Optional capabilities a service declares up front
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// The service exposes a sub-surface of operations
    pub exposes_operations: bool,
    /// The service runs its own periodic work while running
    pub requires_tick: bool,
}

/// Static identity of a service implementation.
///
/// Built once with the builder methods and then shared immutably by the
/// registry and every instance created from it.
///
/// # Examples
///
/// ```
/// use service_host::service::{OptionKind, ServiceDescriptor};
/// use serde_json::json;
///
/// let descriptor = ServiceDescriptor::new("clock", "Reports the current time")
///     .with_option("utc_offset_minutes", OptionKind::Integer, Some(json!(0)), "Offset from UTC")
///     .exposes_operations();
///
/// assert_eq!(descriptor.name(), "clock");
/// assert!(descriptor.capabilities().exposes_operations);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    name: String,
    description: String,
    options: BTreeMap<String, OptionSpec>,
    capabilities: Capabilities,
}

impl ServiceDescriptor {
    /// Create a descriptor with no options and no capabilities
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            options: BTreeMap::new(),
            capabilities: Capabilities::default(),
        }
    }

    /// Declare an optional option, with an optional default
    pub fn with_option(
        mut self,
        name: &str,
        kind: OptionKind,
        default: Option<Value>,
        description: &str,
    ) -> Self {
        self.options.insert(
            name.to_string(),
            OptionSpec {
                kind,
                default,
                required: false,
                description: description.to_string(),
            },
        );
        self
    }

    /// Declare a required option
    pub fn with_required_option(mut self, name: &str, kind: OptionKind, description: &str) -> Self {
        self.options.insert(
            name.to_string(),
            OptionSpec {
                kind,
                default: None,
                required: true,
                description: description.to_string(),
            },
        );
        self
    }

    /// Mark the service as exposing a sub-surface
    pub fn exposes_operations(mut self) -> Self {
        self.capabilities.exposes_operations = true;
        self
    }

    /// Mark the service as running periodic work
    pub fn requires_tick(mut self) -> Self {
        self.capabilities.requires_tick = true;
        self
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared option schema
    pub fn options(&self) -> &BTreeMap<String, OptionSpec> {
        &self.options
    }

    /// Declared capabilities
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Validate raw options against the schema and fill in defaults.
    ///
    /// Unknown options, missing required options and mistyped values are
    /// all reported as [`Error::Configuration`]. Every problem is listed,
    /// not only the first one.
    pub fn resolve_options(&self, raw: &Map<String, Value>) -> Result<ServiceOptions> {
        let mut problems = Vec::new();

        for key in raw.keys() {
            if !self.options.contains_key(key) {
                problems.push(format!("unknown option '{}'", key));
            }
        }

        let mut resolved = Map::new();
        for (key, spec) in &self.options {
            match raw.get(key) {
                Some(value) if spec.kind.matches(value) => {
                    resolved.insert(key.clone(), value.clone());
                }
                Some(value) => problems.push(format!(
                    "option '{}' expects {:?}, got {}",
                    key, spec.kind, value
                )),
                None => match &spec.default {
                    Some(default) => {
                        resolved.insert(key.clone(), default.clone());
                    }
                    None if spec.required => {
                        problems.push(format!("missing required option '{}'", key))
                    }
                    None => {}
                },
            }
        }

        if problems.is_empty() {
            Ok(ServiceOptions::new(resolved))
        } else {
            Err(Error::configuration(&self.name, problems.join("; ")))
        }
    }
}

/// Options after validation against a [`ServiceDescriptor`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ServiceOptions {
    values: Map<String, Value>,
}

impl ServiceOptions {
    /// Wrap an already-validated map
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Raw value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Signed integer value
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    /// Unsigned integer value
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    /// Floating point value
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    /// Boolean value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    /// Underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}
