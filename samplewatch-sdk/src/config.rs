//! Monitor configuration: raw documents, coercion rules and the validated,
//! read-only configuration handed to plugins.

use std::cmp::Ordering;
use std::fmt;

use samplewatch_types::{OptionDescriptor, Value, ValueType};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;
use crate::registry::MetadataRegistry;

/// Key of the field naming the plugin module a document configures.
pub const MODULE_FIELD: &str = "module";

/// A raw configuration document: string keys mapped to primitive values.
///
/// Keys keep the order they were first inserted in. Inserting an existing key
/// replaces its value in place.
///
/// # Example
///
/// ```rust
/// use samplewatch_sdk::ConfigDocument;
///
/// let doc: ConfigDocument = serde_json::from_str(
///     r#"{"module": "acme.disk", "path": "/var", "threshold": "15.5"}"#,
/// ).unwrap();
/// let keys: Vec<_> = doc.keys().collect();
/// assert_eq!(keys, vec!["module", "path", "threshold"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    entries: Vec<(String, Value)>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Chainable form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConfigDocument {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = ConfigDocument::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl Serialize for ConfigDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ConfigDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = ConfigDocument;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a flat map of primitive values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut doc = ConfigDocument::new();
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    doc.insert(key, value);
                }
                Ok(doc)
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Validation rules for a single [`MonitorConfig::get`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    pub required: bool,
    pub convert_to: Option<ValueType>,
    pub min_value: Option<Value>,
    pub max_value: Option<Value>,
    pub default: Option<Value>,
}

impl GetOptions {
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn convert_to(mut self, value_type: ValueType) -> Self {
        self.convert_to = Some(value_type);
        self
    }

    pub fn min_value(mut self, value: impl Into<Value>) -> Self {
        self.min_value = Some(value.into());
        self
    }

    pub fn max_value(mut self, value: impl Into<Value>) -> Self {
        self.max_value = Some(value.into());
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

impl From<&OptionDescriptor> for GetOptions {
    fn from(option: &OptionDescriptor) -> Self {
        Self {
            required: option.required,
            convert_to: option.convert_to,
            min_value: option.min_value.clone(),
            max_value: option.max_value.clone(),
            default: option.default.clone(),
        }
    }
}

/// Validated, read-only configuration for one monitor instance.
///
/// Built by applying every option registered for the module against the raw
/// document. Keys without a descriptor pass through unchanged. There are no
/// mutators; `clone` yields an independent copy. Equality ignores key order.
///
/// # Example
///
/// ```rust
/// use samplewatch_sdk::{ConfigDocument, MetadataRegistry, MonitorConfig};
/// use samplewatch_types::{OptionDescriptor, Value, ValueType};
///
/// let registry = MetadataRegistry::new();
/// registry.register_option(
///     "acme.threshold",
///     OptionDescriptor::builder("threshold")
///         .convert_to(ValueType::Float)
///         .default(10)
///         .min_value(0)
///         .build(),
/// );
///
/// let doc = ConfigDocument::new().with("threshold", "15.5");
/// let config = MonitorConfig::new(doc, "acme.threshold", &registry).unwrap();
/// assert_eq!(config.item("threshold").unwrap(), &Value::Float(15.5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    entries: ConfigDocument,
}

impl MonitorConfig {
    /// Validate `document` against the options registered for `module`.
    ///
    /// An option is applied when it is required, has a default, or its key
    /// is present in the document.
    pub fn new(
        document: ConfigDocument,
        module: &str,
        registry: &MetadataRegistry,
    ) -> Result<Self, ConfigError> {
        let options: Vec<OptionDescriptor> = registry
            .with_module(module, |m| m.config_options().into_iter().cloned().collect())
            .unwrap_or_default();

        let mut config = Self { entries: document };
        for option in &options {
            if option.required || option.default.is_some() || config.contains_key(&option.name) {
                if let Some(value) = config.get(&option.name, &GetOptions::from(option))? {
                    config.entries.insert(option.name.clone(), value);
                }
            }
        }
        Ok(config)
    }

    /// Read a field, applying the given validation rules.
    ///
    /// Returns `Ok(None)` when the field is absent and no default is given.
    pub fn get(&self, field: &str, options: &GetOptions) -> Result<Option<Value>, ConfigError> {
        if options.required && !self.entries.contains_key(field) {
            return Err(ConfigError::MissingRequiredField(field.to_string()));
        }

        let mut value = match self.entries.get(field).or(options.default.as_ref()) {
            Some(v) => v.clone(),
            None => return Ok(None),
        };

        if let Some(target) = options.convert_to {
            value = coerce(field, value, target)?;
        }

        if let Some(max) = &options.max_value {
            if check_bound(field, &value, max)? == Ordering::Greater {
                return Err(ConfigError::ValueAboveMaximum {
                    field: field.to_string(),
                    value,
                    max: max.clone(),
                });
            }
        }

        if let Some(min) = &options.min_value {
            if check_bound(field, &value, min)? == Ordering::Less {
                return Err(ConfigError::ValueBelowMinimum {
                    field: field.to_string(),
                    value,
                    min: min.clone(),
                });
            }
        }

        Ok(Some(value))
    }

    /// Indexed lookup; fails with `KeyNotFound` when absent.
    pub fn item(&self, field: &str) -> Result<&Value, ConfigError> {
        self.entries
            .get(field)
            .ok_or_else(|| ConfigError::KeyNotFound(field.to_string()))
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.entries.contains_key(field)
    }

    /// Keys in the order of the underlying raw document.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The plugin module this configuration is for, if the document names one.
    pub fn module(&self) -> Option<&str> {
        self.get_str(MODULE_FIELD)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.entries.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.entries.get(field).and_then(Value::as_bool)
    }

    pub fn get_int(&self, field: &str) -> Option<i32> {
        self.entries.get(field).and_then(Value::as_i32)
    }

    pub fn get_long(&self, field: &str) -> Option<i64> {
        self.entries.get(field).and_then(Value::as_i64)
    }

    pub fn get_float(&self, field: &str) -> Option<f64> {
        self.entries.get(field).and_then(Value::as_f64)
    }
}

impl PartialEq for MonitorConfig {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.entries.get(k) == Some(v))
    }
}

impl Serialize for MonitorConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

/// Convert `value` to `target` under the fixed widening rules.
///
/// Anything converts to text. Text converts to numbers by parsing and to
/// booleans by a case-insensitive match against `"true"`, so every other
/// string, `"false"` and `"1"` included, becomes `false`. Integers widen to
/// wide integers and floats. Nothing narrows and numbers never become
/// booleans.
pub fn coerce(field: &str, value: Value, target: ValueType) -> Result<Value, ConfigError> {
    let from = value.value_type();
    if from == target {
        return Ok(value);
    }

    match (value, target) {
        (v, ValueType::Str) => Ok(Value::Text(v.to_string())),

        (Value::Text(s), ValueType::Bool) => Ok(Value::Bool(s.to_lowercase() == "true")),
        (Value::Text(s), ValueType::Int) => parse_numeric(field, &s, target, |t| t.parse().map(Value::Int).ok()),
        (Value::Text(s), ValueType::Long) => parse_numeric(field, &s, target, |t| t.parse().map(Value::Long).ok()),
        (Value::Text(s), ValueType::Float) => parse_numeric(field, &s, target, |t| t.parse().map(Value::Float).ok()),

        (v, ValueType::Bool) if v.is_numeric() => Err(ConfigError::NumericToBooleanNotAllowed {
            field: field.to_string(),
            value: v,
        }),

        (Value::Int(i), ValueType::Float) => Ok(Value::Float(f64::from(i))),
        (Value::Long(l), ValueType::Float) => Ok(Value::Float(l as f64)),
        (Value::Int(i), ValueType::Long) => Ok(Value::Long(i64::from(i))),

        (v @ Value::Float(_), ValueType::Int | ValueType::Long) | (v @ Value::Long(_), ValueType::Int) => {
            Err(ConfigError::NarrowingConversionNotAllowed {
                field: field.to_string(),
                value: v,
                from,
                target,
            })
        }

        _ => Err(ConfigError::UnsupportedConversion {
            field: field.to_string(),
            from,
            target,
        }),
    }
}

fn parse_numeric(
    field: &str,
    text: &str,
    target: ValueType,
    parse: impl FnOnce(&str) -> Option<Value>,
) -> Result<Value, ConfigError> {
    parse(text.trim()).ok_or_else(|| ConfigError::InvalidNumericValue {
        field: field.to_string(),
        value: text.to_string(),
        target,
    })
}

fn check_bound(field: &str, value: &Value, bound: &Value) -> Result<Ordering, ConfigError> {
    value
        .compare(bound)
        .ok_or_else(|| ConfigError::IncomparableBound {
            field: field.to_string(),
            value: value.clone(),
            bound: bound.clone(),
        })
}
