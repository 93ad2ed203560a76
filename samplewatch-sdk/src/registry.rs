//! Metadata registry for monitor modules.
//!
//! Plugin modules declare their options, metrics and log fields here during
//! their own initialization. Configuration validation reads the option
//! schema back out; documentation tooling reads everything.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use parking_lot::RwLock;
use samplewatch_types::{LogFieldDescriptor, MetricDescriptor, OptionDescriptor};

/// Everything declared for one monitor module.
///
/// Every upsert stamps the descriptor with a fresh position from the record's
/// counter, and the list accessors sort by that position. Re-registering a
/// key therefore moves it to the end.
#[derive(Debug, Clone, Default)]
pub struct ModuleMetadata {
    module: String,
    description: Option<String>,
    options: BTreeMap<String, OptionDescriptor>,
    metrics: BTreeMap<String, MetricDescriptor>,
    log_fields: BTreeMap<String, LogFieldDescriptor>,
    counter: u64,
}

impl ModuleMetadata {
    fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            ..Default::default()
        }
    }

    /// The module identifier.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Markdown description of the monitor, if one was set.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Options in registration order.
    pub fn config_options(&self) -> Vec<&OptionDescriptor> {
        let mut items: Vec<_> = self.options.values().collect();
        items.sort_by_key(|o| o.insertion_order);
        items
    }

    /// Look up a single option by name.
    pub fn option(&self, name: &str) -> Option<&OptionDescriptor> {
        self.options.get(name)
    }

    /// Metrics in registration order.
    pub fn metrics(&self) -> Vec<&MetricDescriptor> {
        let mut items: Vec<_> = self.metrics.values().collect();
        items.sort_by_key(|m| m.insertion_order);
        items
    }

    /// Log fields in registration order.
    pub fn log_fields(&self) -> Vec<&LogFieldDescriptor> {
        let mut items: Vec<_> = self.log_fields.values().collect();
        items.sort_by_key(|f| f.insertion_order);
        items
    }

    fn next_position(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn set_description(&mut self, description: String) {
        self.next_position();
        self.description = Some(description);
    }

    fn upsert_option(&mut self, mut option: OptionDescriptor) {
        option.insertion_order = self.next_position();
        self.options.insert(option.name.clone(), option);
    }

    fn upsert_metric(&mut self, mut metric: MetricDescriptor) {
        metric.insertion_order = self.next_position();
        self.metrics.insert(metric.key(), metric);
    }

    fn upsert_log_field(&mut self, mut field: LogFieldDescriptor) {
        field.insertion_order = self.next_position();
        self.log_fields.insert(field.field_name.clone(), field);
    }
}

/// Process-wide store of [`ModuleMetadata`], keyed by module identifier.
///
/// Most callers use [`MetadataRegistry::global`]. Tests and embedders that
/// need isolation construct their own with [`MetadataRegistry::new`].
///
/// # Example
///
/// ```rust
/// use samplewatch_sdk::MetadataRegistry;
/// use samplewatch_types::{OptionDescriptor, ValueType};
///
/// let registry = MetadataRegistry::new();
/// registry
///     .module("acme.disk")
///     .description("Disk usage")
///     .option(OptionDescriptor::builder("path").required().convert_to(ValueType::Str).build());
///
/// let meta = registry.get_module_metadata("acme.disk").unwrap();
/// assert_eq!(meta.config_options()[0].name, "path");
/// ```
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    modules: RwLock<BTreeMap<String, ModuleMetadata>>,
}

impl MetadataRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static MetadataRegistry {
        static GLOBAL: OnceLock<MetadataRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MetadataRegistry::new)
    }

    /// Chainable registration helper for one module.
    pub fn module<'a>(&'a self, module: &str) -> ModuleRegistrar<'a> {
        ModuleRegistrar {
            registry: self,
            module: module.to_string(),
        }
    }

    /// Set the markdown description for a module.
    pub fn set_description(&self, module: &str, description: impl Into<String>) {
        let description = description.into();
        self.upsert(module, |m| m.set_description(description));
    }

    /// Declare a configuration option, replacing any earlier one of the same name.
    pub fn register_option(&self, module: &str, option: OptionDescriptor) {
        self.upsert(module, |m| m.upsert_option(option));
    }

    /// Declare a metric, replacing any earlier one with the same key.
    pub fn register_metric(&self, module: &str, metric: MetricDescriptor) {
        self.upsert(module, |m| m.upsert_metric(metric));
    }

    /// Declare a log field, replacing any earlier one of the same name.
    pub fn register_log_field(&self, module: &str, field: LogFieldDescriptor) {
        self.upsert(module, |m| m.upsert_log_field(field));
    }

    /// A copy of the metadata for a module, or `None` if nothing was ever
    /// registered for it. Reading never creates a record.
    pub fn get_module_metadata(&self, module: &str) -> Option<ModuleMetadata> {
        self.modules.read().get(module).cloned()
    }

    /// Run `f` against a module's metadata without copying it.
    pub fn with_module<R>(&self, module: &str, f: impl FnOnce(&ModuleMetadata) -> R) -> Option<R> {
        self.modules.read().get(module).map(f)
    }

    /// Identifiers of every module with metadata, sorted.
    pub fn modules(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    fn upsert(&self, module: &str, f: impl FnOnce(&mut ModuleMetadata)) {
        let mut modules = self.modules.write();
        let record = modules
            .entry(module.to_string())
            .or_insert_with(|| ModuleMetadata::new(module));
        f(record);
    }
}

/// Fluent registration for a single module, returned by [`MetadataRegistry::module`].
#[derive(Debug)]
pub struct ModuleRegistrar<'a> {
    registry: &'a MetadataRegistry,
    module: String,
}

impl<'a> ModuleRegistrar<'a> {
    pub fn description(self, description: impl Into<String>) -> Self {
        self.registry.set_description(&self.module, description);
        self
    }

    pub fn option(self, option: OptionDescriptor) -> Self {
        self.registry.register_option(&self.module, option);
        self
    }

    pub fn metric(self, metric: MetricDescriptor) -> Self {
        self.registry.register_metric(&self.module, metric);
        self
    }

    pub fn log_field(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.registry
            .register_log_field(&self.module, LogFieldDescriptor::new(name, description));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samplewatch_types::ValueType;

    fn option(name: &str) -> OptionDescriptor {
        OptionDescriptor::builder(name).build()
    }

    #[test]
    fn reading_unknown_module_returns_none_without_creating_it() {
        let registry = MetadataRegistry::new();
        assert!(registry.get_module_metadata("nope").is_none());
        assert!(registry.modules().is_empty());
    }

    #[test]
    fn options_come_back_in_registration_order() {
        let registry = MetadataRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register_option("m", option(name));
        }

        let meta = registry.get_module_metadata("m").unwrap();
        let names: Vec<_> = meta.config_options().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn reregistering_option_overwrites_and_moves_to_end() {
        let registry = MetadataRegistry::new();
        registry.register_option("m", option("a"));
        registry.register_option("m", option("b"));
        registry.register_option(
            "m",
            OptionDescriptor::builder("a").convert_to(ValueType::Int).build(),
        );

        let meta = registry.get_module_metadata("m").unwrap();
        let options = meta.config_options();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].name, "b");
        assert_eq!(options[1].name, "a");
        assert_eq!(options[1].convert_to, Some(ValueType::Int));
    }

    #[test]
    fn metrics_with_different_extra_fields_are_kept_apart() {
        let registry = MetadataRegistry::new();
        registry.register_metric(
            "m",
            MetricDescriptor::builder("cpu").extra_field("type", "user").build(),
        );
        registry.register_metric(
            "m",
            MetricDescriptor::builder("cpu").extra_field("type", "system").build(),
        );
        registry.register_metric("m", MetricDescriptor::builder("cpu").build());

        let meta = registry.get_module_metadata("m").unwrap();
        assert_eq!(meta.metrics().len(), 3);
    }

    #[test]
    fn insertion_order_is_shared_across_kinds() {
        let registry = MetadataRegistry::new();
        registry
            .module("m")
            .option(option("o1"))
            .metric(MetricDescriptor::builder("x").build())
            .log_field("f1", "first field")
            .option(option("o2"));

        let meta = registry.get_module_metadata("m").unwrap();
        let opts = meta.config_options();
        assert_eq!(opts[0].insertion_order, 1);
        assert_eq!(meta.metrics()[0].insertion_order, 2);
        assert_eq!(meta.log_fields()[0].insertion_order, 3);
        assert_eq!(opts[1].insertion_order, 4);
    }

    #[test]
    fn log_fields_sorted_by_insertion_not_name() {
        let registry = MetadataRegistry::new();
        registry.module("m").log_field("z", "").log_field("a", "");

        let meta = registry.get_module_metadata("m").unwrap();
        let names: Vec<_> = meta.log_fields().iter().map(|f| f.field_name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn description_is_last_write_wins() {
        let registry = MetadataRegistry::new();
        registry.set_description("m", "first");
        registry.set_description("m", "second");
        assert_eq!(
            registry.get_module_metadata("m").unwrap().description(),
            Some("second")
        );
    }

    #[test]
    fn modules_are_independent() {
        let registry = MetadataRegistry::new();
        registry.register_option("a", option("x"));
        registry.register_option("b", option("y"));

        assert_eq!(registry.modules(), vec!["a".to_string(), "b".to_string()]);
        let a = registry.get_module_metadata("a").unwrap();
        assert!(a.option("x").is_some());
        assert!(a.option("y").is_none());
        assert_eq!(a.module(), "a");
    }

    #[test]
    fn global_registry_is_shared() {
        let module = "registry.tests.global";
        MetadataRegistry::global().register_option(module, option("shared"));
        assert!(MetadataRegistry::global()
            .with_module(module, |m| m.option("shared").is_some())
            .unwrap_or(false));
    }
}
