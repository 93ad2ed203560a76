//! Descriptors for the options, metrics and log fields a monitor module declares.

use std::collections::BTreeMap;

use crate::{Value, ValueType};

/// A configuration option accepted by a monitor module.
///
/// Options drive validation: when a monitor configuration is built, every
/// registered option is applied to the raw document.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptionDescriptor {
    /// Option name (the key in the configuration document).
    pub name: String,

    /// Human readable description, used for reference docs.
    pub description: String,

    /// Construction fails if the option is missing.
    pub required: bool,

    /// The type the raw value is coerced to, if any.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub convert_to: Option<ValueType>,

    /// Value used when the option is absent. Ignored for required options.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub default: Option<Value>,

    /// Inclusive lower bound.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub min_value: Option<Value>,

    /// Inclusive upper bound.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub max_value: Option<Value>,

    /// Position stamped by the metadata registry on registration.
    #[cfg_attr(feature = "serde", serde(default))]
    pub insertion_order: u64,
}

impl OptionDescriptor {
    /// Create a builder for an option.
    pub fn builder(name: impl Into<String>) -> OptionDescriptorBuilder {
        OptionDescriptorBuilder::new(name)
    }
}

/// A metric emitted by a monitor module.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricDescriptor {
    pub metric_name: String,

    pub description: String,

    /// Extra fields recorded with the metric, mapped to the values this
    /// description applies to.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub extra_fields: Option<BTreeMap<String, String>>,

    /// Unit of the value, e.g. `sec`, `bytes` or `sec:.01`.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub unit: Option<String>,

    /// True if the value is a running total since the monitored process began.
    pub cumulative: bool,

    /// Documentation grouping for modules with many metrics.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub category: Option<String>,

    #[cfg_attr(feature = "serde", serde(default))]
    pub insertion_order: u64,
}

impl MetricDescriptor {
    /// Create a builder for a metric.
    pub fn builder(metric_name: impl Into<String>) -> MetricDescriptorBuilder {
        MetricDescriptorBuilder::new(metric_name)
    }

    /// Registry key for this metric.
    ///
    /// Metrics sharing a name but declaring different extra fields are kept
    /// apart by appending the serialized field map to the name.
    ///
    /// ```rust
    /// use samplewatch_types::MetricDescriptor;
    ///
    /// let plain = MetricDescriptor::builder("app.cpu").build();
    /// assert_eq!(plain.key(), "app.cpu");
    ///
    /// let user = MetricDescriptor::builder("app.cpu").extra_field("type", "user").build();
    /// assert_eq!(user.key(), r#"app.cpu{"type": "user"}"#);
    /// ```
    pub fn key(&self) -> String {
        match &self.extra_fields {
            None => self.metric_name.clone(),
            Some(fields) => {
                let body = fields
                    .iter()
                    .map(|(k, v)| format!("{:?}: {:?}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}{{{}}}", self.metric_name, body)
            }
        }
    }
}

/// A field parsed out of the log lines a monitor module writes.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogFieldDescriptor {
    pub field_name: String,
    pub description: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub insertion_order: u64,
}

impl LogFieldDescriptor {
    pub fn new(field_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            description: description.into(),
            insertion_order: 0,
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Builder for `OptionDescriptor`.
#[derive(Debug)]
pub struct OptionDescriptorBuilder {
    inner: OptionDescriptor,
}

impl OptionDescriptorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: OptionDescriptor {
                name: name.into(),
                description: String::new(),
                required: false,
                convert_to: None,
                default: None,
                min_value: None,
                max_value: None,
                insertion_order: 0,
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }

    /// Mark the option as required.
    pub fn required(mut self) -> Self {
        self.inner.required = true;
        self
    }

    pub fn convert_to(mut self, value_type: ValueType) -> Self {
        self.inner.convert_to = Some(value_type);
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.inner.default = Some(value.into());
        self
    }

    pub fn min_value(mut self, value: impl Into<Value>) -> Self {
        self.inner.min_value = Some(value.into());
        self
    }

    pub fn max_value(mut self, value: impl Into<Value>) -> Self {
        self.inner.max_value = Some(value.into());
        self
    }

    pub fn build(self) -> OptionDescriptor {
        self.inner
    }
}

/// Builder for `MetricDescriptor`.
#[derive(Debug)]
pub struct MetricDescriptorBuilder {
    inner: MetricDescriptor,
}

impl MetricDescriptorBuilder {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            inner: MetricDescriptor {
                metric_name: metric_name.into(),
                ..Default::default()
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }

    /// Add one extra field; the first call turns the field map on.
    pub fn extra_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner
            .extra_fields
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.inner.unit = Some(unit.into());
        self
    }

    pub fn cumulative(mut self) -> Self {
        self.inner.cumulative = true;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.inner.category = Some(category.into());
        self
    }

    pub fn build(self) -> MetricDescriptor {
        self.inner
    }
}
