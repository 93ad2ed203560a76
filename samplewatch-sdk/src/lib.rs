//! # samplewatch-sdk
//!
//! Runtime and plugin contract for samplewatch monitors.
//!
//! A monitor is a plugin that periodically gathers a sample and emits metric
//! records. This crate runs each monitor on its own thread, validates its
//! configuration against the options the module declared, and keeps the
//! declarations around for documentation tooling.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use samplewatch_sdk::{
//!     ConfigDocument, MetadataRegistry, Monitor, MonitorContext, MonitorRuntime, SampleError,
//! };
//! use samplewatch_types::{MetricDescriptor, MetricRecord, OptionDescriptor, ValueType};
//! use std::time::Duration;
//!
//! struct Threshold {
//!     threshold: f64,
//! }
//!
//! impl Monitor for Threshold {
//!     fn gather_sample(&mut self, ctx: &MonitorContext) -> Result<(), SampleError> {
//!         ctx.emit(MetricRecord::new("acme.threshold", self.threshold))?;
//!         Ok(())
//!     }
//! }
//!
//! // Declare the module's options once, before any configuration is built
//! MetadataRegistry::global()
//!     .module("acme.threshold")
//!     .description("Reports the configured threshold.")
//!     .option(
//!         OptionDescriptor::builder("threshold")
//!             .convert_to(ValueType::Float)
//!             .default(10)
//!             .min_value(0)
//!             .build(),
//!     )
//!     .metric(MetricDescriptor::builder("acme.threshold").build());
//!
//! let document = ConfigDocument::new()
//!     .with("module", "acme.threshold")
//!     .with("threshold", "15.5");
//!
//! let runtime = MonitorRuntime::builder(document)
//!     .sample_interval(Duration::from_secs(5))
//!     .build(|config| {
//!         Ok(Threshold {
//!             threshold: config.get_float("threshold").unwrap_or_default(),
//!         })
//!     })?;
//!
//! runtime.start()?;
//! // ... later ...
//! runtime.shutdown(Some(Duration::from_secs(5)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Pieces
//!
//! - [`MetadataRegistry`]: per-module options, metrics and log fields
//! - [`MonitorConfig`]: a configuration document validated and coerced
//!   against the registered options
//! - [`MonitorRuntime`]: lifecycle, sampling thread, counters
//! - [`Sink`]: where records and notices go ([`Output`], [`MemorySink`])
//! - [`MonitorCatalog`]: module identifier to plugin constructor

mod catalog;
mod config;
mod docs;
mod error;
mod monitor;
mod registry;
mod runtime;
mod sink;

pub use catalog::{Constructor, Declare, MonitorCatalog};
pub use config::{coerce, ConfigDocument, GetOptions, MonitorConfig, MODULE_FIELD};
pub use docs::render_markdown;
pub use error::{ConfigError, MonitorError, RuntimeError, SampleError};
pub use monitor::{run_sampling_loop, Monitor};
pub use registry::{MetadataRegistry, ModuleMetadata, ModuleRegistrar};
pub use runtime::{
    MonitorContext, MonitorRuntime, MonitorRuntimeBuilder, RunState, DEFAULT_SAMPLE_INTERVAL,
    SAMPLE_INTERVAL_FIELD,
};
pub use sink::{
    MemorySink, Output, OutputSink, RateLimit, Sink, TCP_CONNECT_TIMEOUT, TCP_RETRY_DELAY,
    TCP_WRITE_TIMEOUT,
};

// Re-export types for convenience
pub use samplewatch_types::{
    LogFieldDescriptor, MetricDescriptor, MetricRecord, OptionDescriptor, Value, ValueType,
};
