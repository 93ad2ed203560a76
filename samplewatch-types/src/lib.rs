//! # samplewatch-types
//!
//! Core types shared by samplewatch monitor plugins and their hosts.
//!
//! ## Design Goals
//!
//! - **Closed value model**: configuration values are one of five primitives
//!   ([`Value`]), never an open-ended dynamic value
//! - **Optional serialization**: enable the `serde` feature to read documents
//!   and write records as JSON, TOML, etc.
//! - **Ergonomic builders**: fluent API for declaring descriptors
//!
//! ## Features
//!
//! - `serde`: (de)serialization of values, descriptors and records
//!
//! ## Example
//!
//! ```rust
//! use samplewatch_types::{MetricDescriptor, OptionDescriptor, ValueType};
//!
//! let option = OptionDescriptor::builder("threshold")
//!     .description("Alert when the value exceeds this")
//!     .convert_to(ValueType::Float)
//!     .default(10)
//!     .min_value(0)
//!     .build();
//!
//! let metric = MetricDescriptor::builder("app.requests")
//!     .description("Requests served since start")
//!     .cumulative()
//!     .build();
//!
//! assert_eq!(option.name, "threshold");
//! assert_eq!(metric.key(), "app.requests");
//! ```

mod descriptor;
mod record;
mod value;

pub use descriptor::*;
pub use record::*;
pub use value::*;
