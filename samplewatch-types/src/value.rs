//! Primitive configuration values.
//!
//! Monitor configuration arrives as loosely typed external data. Everything is
//! narrowed to this closed set of primitives before plugin code sees it.

use std::cmp::Ordering;
use std::fmt;

/// The primitive type of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// 32-bit integer.
    Int,
    /// 64-bit ("wide") integer.
    Long,
    /// Double precision floating point.
    Float,
    /// Text.
    Str,
}

impl ValueType {
    /// Short lowercase name, as used in error messages and documentation.
    pub const fn name(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Float => "float",
            ValueType::Str => "str",
        }
    }

    /// True for `Int`, `Long` and `Float`.
    pub const fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Int | ValueType::Long | ValueType::Float)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A primitive configuration value.
///
/// Equality is structural: `Value::Int(1)` and `Value::Long(1)` are different
/// values. Use [`Value::compare`] for the numeric ordering used by bounds
/// checks.
///
/// # Example
///
/// ```rust
/// use samplewatch_types::{Value, ValueType};
///
/// let v = Value::from(10);
/// assert_eq!(v.value_type(), ValueType::Int);
/// assert_eq!(Value::from(10.0).to_string(), "10.0");
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// The primitive type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Long(_) => ValueType::Long,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Str,
        }
    }

    /// True for integers, wide integers and floats.
    pub fn is_numeric(&self) -> bool {
        self.value_type().is_numeric()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns integers of either width as `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Returns any numeric value as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(f64::from(*i)),
            Value::Long(l) => Some(*l as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Order two values for bounds checking.
    ///
    /// Numbers compare numerically regardless of width, text compares
    /// lexically with text, booleans with booleans. Every other pairing is
    /// incomparable and yields `None`, as does a comparison involving NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }
}

impl fmt::Display for Value {
    /// The canonical textual form. Integral floats keep a trailing `.0`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Float(x) => {
                let text = x.to_string();
                if x.is_finite() && !text.contains(['.', 'e']) {
                    write!(f, "{}.0", text)
                } else {
                    f.write_str(&text)
                }
            }
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
