//! Human readable output for the `list` and `describe` commands.

use samplewatch_sdk::{render_markdown, MetadataRegistry, MonitorCatalog};

/// One line per catalogued module: identifier and the first line of its description.
pub fn module_list(catalog: &MonitorCatalog, registry: &MetadataRegistry) -> String {
    catalog.describe_all(registry);

    let width = catalog.modules().iter().map(|m| m.len()).max().unwrap_or(0);
    let mut out = String::new();
    for module in catalog.modules() {
        let summary = registry
            .with_module(module, |m| {
                m.description()
                    .and_then(|d| d.lines().next())
                    .unwrap_or_default()
                    .to_string()
            })
            .unwrap_or_default();
        out.push_str(&format!("{:<width$}  {}\n", module, summary, width = width));
    }
    out
}

/// The markdown reference page for a module, or `None` if it is not catalogued.
pub fn describe(
    catalog: &MonitorCatalog,
    registry: &MetadataRegistry,
    module: &str,
) -> Option<String> {
    catalog
        .describe(module, registry)
        .map(|meta| render_markdown(&meta))
}
