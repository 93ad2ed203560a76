//! Error types for configuration, construction and sampling.

use samplewatch_types::{Value, ValueType};
use thiserror::Error;

/// A monitor configuration failed validation.
///
/// Always surfaced to whoever builds the configuration; a misconfigured
/// monitor must not start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A required field was not present in the document.
    #[error("Missing required field \"{0}\"")]
    MissingRequiredField(String),

    /// Text could not be parsed as the requested numeric type.
    #[error("Could not parse value {value} for field \"{field}\" as numeric type {target}")]
    InvalidNumericValue {
        field: String,
        value: String,
        target: ValueType,
    },

    /// Numbers are never coerced to booleans.
    #[error("A numeric value {value} was given for boolean field \"{field}\"")]
    NumericToBooleanNotAllowed { field: String, value: Value },

    /// A float to integer or wide-integer to integer conversion was requested.
    #[error("A {from} value of {value} was given for field \"{field}\" but a {target} is required")]
    NarrowingConversionNotAllowed {
        field: String,
        value: Value,
        from: ValueType,
        target: ValueType,
    },

    /// Any conversion outside the supported rules.
    #[error("Unable to convert type {from} for field \"{field}\" to type {target}")]
    UnsupportedConversion {
        field: String,
        from: ValueType,
        target: ValueType,
    },

    #[error("Value of {value} in field \"{field}\" is invalid; maximum is {max}")]
    ValueAboveMaximum { field: String, value: Value, max: Value },

    #[error("Value of {value} in field \"{field}\" is invalid; minimum is {min}")]
    ValueBelowMinimum { field: String, value: Value, min: Value },

    /// The value and its bound are of kinds that cannot be ordered.
    #[error("Value of {value} in field \"{field}\" cannot be compared with bound {bound}")]
    IncomparableBound { field: String, value: Value, bound: Value },

    /// Indexed lookup of a field that is not in the configuration.
    #[error("The missing field \"{0}\" in monitor config")]
    KeyNotFound(String),
}

impl ConfigError {
    /// The configuration field the error refers to.
    pub fn field(&self) -> &str {
        match self {
            ConfigError::MissingRequiredField(field)
            | ConfigError::KeyNotFound(field)
            | ConfigError::InvalidNumericValue { field, .. }
            | ConfigError::NumericToBooleanNotAllowed { field, .. }
            | ConfigError::NarrowingConversionNotAllowed { field, .. }
            | ConfigError::UnsupportedConversion { field, .. }
            | ConfigError::ValueAboveMaximum { field, .. }
            | ConfigError::ValueBelowMinimum { field, .. }
            | ConfigError::IncomparableBound { field, .. } => field,
        }
    }
}

/// A monitor could not be constructed.
///
/// Returned synchronously from construction; the caller never receives a
/// runtime instance.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Bad monitor configuration: {0}")]
    Config(#[from] ConfigError),

    /// The monitor determined it cannot run on this host.
    #[error("Monitor {monitor} is not supported on this system: {message}")]
    UnsupportedEnvironment { monitor: String, message: String },

    /// No plugin is registered for the module named in the document.
    #[error("No monitor registered for module \"{0}\"")]
    UnknownModule(String),
}

impl MonitorError {
    pub fn unsupported(monitor: impl Into<String>, message: impl Into<String>) -> Self {
        MonitorError::UnsupportedEnvironment {
            monitor: monitor.into(),
            message: message.into(),
        }
    }
}

/// Misuse of the runtime lifecycle, or a failure activating it.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Monitor {0} has already been started")]
    AlreadyStarted(String),

    #[error("Failed to open output for monitor {name}: {source}")]
    OpenOutput {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn thread for monitor {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A sample could not be gathered.
///
/// Caught by the runtime loop, counted and logged; never propagated further.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The sample routine panicked.
    #[error("Sample routine panicked: {0}")]
    Panic(String),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl SampleError {
    pub fn msg(message: impl Into<String>) -> Self {
        SampleError::Message(message.into())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for SampleError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        SampleError::Other(err)
    }
}
