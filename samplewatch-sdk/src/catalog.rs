//! Table of monitor plugins available to a host.

use std::collections::BTreeMap;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::monitor::Monitor;
use crate::registry::{MetadataRegistry, ModuleMetadata};

/// Builds a plugin from its validated configuration.
pub type Constructor = fn(&MonitorConfig) -> Result<Box<dyn Monitor>, MonitorError>;

/// Declares a plugin's options, metrics and log fields.
pub type Declare = fn(&MetadataRegistry);

#[derive(Clone, Copy)]
struct Entry {
    declare: Declare,
    constructor: Constructor,
}

/// Module identifier to plugin mapping.
///
/// Each entry pairs a constructor with the function that declares the
/// module's metadata. Declaring is separate from constructing so that a host
/// can populate a registry before any configuration is validated.
///
/// # Example
///
/// ```rust
/// use samplewatch_sdk::{
///     ConfigDocument, MetadataRegistry, Monitor, MonitorCatalog, MonitorConfig, MonitorContext,
///     MonitorError, SampleError,
/// };
///
/// struct Noop;
///
/// impl Monitor for Noop {
///     fn gather_sample(&mut self, _ctx: &MonitorContext) -> Result<(), SampleError> {
///         Ok(())
///     }
/// }
///
/// fn declare(registry: &MetadataRegistry) {
///     registry.module("acme.noop").description("Does nothing");
/// }
///
/// fn construct(_config: &MonitorConfig) -> Result<Box<dyn Monitor>, MonitorError> {
///     Ok(Box::new(Noop))
/// }
///
/// let mut catalog = MonitorCatalog::new();
/// catalog.register("acme.noop", declare, construct);
/// assert!(catalog.contains("acme.noop"));
///
/// let registry = MetadataRegistry::new();
/// catalog.describe_all(&registry);
/// assert_eq!(registry.modules(), vec!["acme.noop".to_string()]);
/// ```
#[derive(Clone, Default)]
pub struct MonitorCatalog {
    entries: BTreeMap<String, Entry>,
}

impl MonitorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin, replacing any earlier entry for the same module.
    pub fn register(&mut self, module: impl Into<String>, declare: Declare, constructor: Constructor) {
        self.entries.insert(
            module.into(),
            Entry {
                declare,
                constructor,
            },
        );
    }

    pub fn contains(&self, module: &str) -> bool {
        self.entries.contains_key(module)
    }

    /// Module identifiers, sorted.
    pub fn modules(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn constructor(&self, module: &str) -> Option<Constructor> {
        self.entries.get(module).map(|e| e.constructor)
    }

    /// Construct the plugin named by the configuration's `module` value.
    pub fn instantiate(&self, config: &MonitorConfig) -> Result<Box<dyn Monitor>, MonitorError> {
        let module = config.module().unwrap_or_default();
        let constructor = self
            .constructor(module)
            .ok_or_else(|| MonitorError::UnknownModule(module.to_string()))?;
        constructor(config)
    }

    /// Declare one module's metadata into `registry`.
    pub fn describe(&self, module: &str, registry: &MetadataRegistry) -> Option<ModuleMetadata> {
        let entry = self.entries.get(module)?;
        (entry.declare)(registry);
        registry.get_module_metadata(module)
    }

    /// Declare every plugin's metadata into `registry`.
    pub fn describe_all(&self, registry: &MetadataRegistry) {
        for entry in self.entries.values() {
            (entry.declare)(registry);
        }
    }
}

impl std::fmt::Debug for MonitorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorCatalog")
            .field("modules", &self.modules())
            .finish()
    }
}
