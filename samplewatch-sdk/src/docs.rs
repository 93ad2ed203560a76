//! Markdown reference pages generated from module metadata.

use std::fmt::Write;

use samplewatch_types::{MetricDescriptor, OptionDescriptor};

use crate::registry::ModuleMetadata;

/// Render the reference page for one module.
///
/// Sections with nothing declared are left out. Metrics are grouped into one
/// table per category, in the order each category first appears; metrics
/// without a category come first under no subheading.
///
/// ```rust
/// use samplewatch_sdk::{render_markdown, MetadataRegistry};
/// use samplewatch_types::MetricDescriptor;
///
/// let registry = MetadataRegistry::new();
/// registry
///     .module("acme.disk")
///     .description("Reports disk usage.")
///     .metric(MetricDescriptor::builder("disk.used").unit("bytes").build());
///
/// let page = render_markdown(&registry.get_module_metadata("acme.disk").unwrap());
/// assert!(page.starts_with("# acme.disk\n"));
/// assert!(page.contains("| `disk.used` |  | bytes | no |  |"));
/// ```
pub fn render_markdown(meta: &ModuleMetadata) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", meta.module());

    if let Some(description) = meta.description() {
        let _ = writeln!(out, "\n{}", description.trim_end());
    }

    let options = meta.config_options();
    if !options.is_empty() {
        out.push_str("\n## Configuration options\n\n");
        out.push_str("| Option | Required | Type | Default | Description |\n");
        out.push_str("|---|---|---|---|---|\n");
        for option in options {
            write_option_row(&mut out, option);
        }
    }

    let metrics = meta.metrics();
    if !metrics.is_empty() {
        out.push_str("\n## Metrics\n");
        for (category, group) in group_by_category(&metrics) {
            if let Some(category) = category {
                let _ = writeln!(out, "\n### {}", category);
            }
            out.push_str("\n| Metric | Fields | Unit | Cumulative | Description |\n");
            out.push_str("|---|---|---|---|---|\n");
            for metric in group {
                write_metric_row(&mut out, metric);
            }
        }
    }

    let log_fields = meta.log_fields();
    if !log_fields.is_empty() {
        out.push_str("\n## Log fields\n\n");
        out.push_str("| Field | Description |\n");
        out.push_str("|---|---|\n");
        for field in log_fields {
            let _ = writeln!(
                out,
                "| `{}` | {} |",
                field.field_name,
                cell(&field.description)
            );
        }
    }

    out
}

fn write_option_row(out: &mut String, option: &OptionDescriptor) {
    let _ = writeln!(
        out,
        "| `{}` | {} | {} | {} | {} |",
        option.name,
        if option.required { "yes" } else { "no" },
        option.convert_to.map(|t| t.name()).unwrap_or(""),
        option.default.as_ref().map(|v| cell(&v.to_string())).unwrap_or_default(),
        cell(&option.description),
    );
}

fn write_metric_row(out: &mut String, metric: &MetricDescriptor) {
    let fields = metric
        .extra_fields
        .iter()
        .flatten()
        .map(|(k, v)| format!("`{}={}`", k, v))
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(
        out,
        "| `{}` | {} | {} | {} | {} |",
        metric.metric_name,
        fields,
        metric.unit.as_deref().unwrap_or(""),
        if metric.cumulative { "yes" } else { "no" },
        cell(&metric.description),
    );
}

fn group_by_category<'a>(
    metrics: &[&'a MetricDescriptor],
) -> Vec<(Option<&'a str>, Vec<&'a MetricDescriptor>)> {
    let mut groups: Vec<(Option<&str>, Vec<&MetricDescriptor>)> = Vec::new();
    for &metric in metrics {
        let category = metric.category.as_deref();
        match groups.iter_mut().find(|(c, _)| *c == category) {
            Some((_, group)) => group.push(metric),
            None => groups.push((category, vec![metric])),
        }
    }
    // Uncategorised metrics lead
    groups.sort_by_key(|(c, _)| c.is_some());
    groups
}

/// Keep table cells on one line and free of column separators.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetadataRegistry;
    use samplewatch_types::ValueType;

    fn sample() -> ModuleMetadata {
        let registry = MetadataRegistry::new();
        registry
            .module("acme.app")
            .description("Application metrics.\n")
            .option(
                OptionDescriptor::builder("pid")
                    .description("Process id | or name")
                    .required()
                    .convert_to(ValueType::Int)
                    .build(),
            )
            .option(OptionDescriptor::builder("interval").default(30).build())
            .metric(
                MetricDescriptor::builder("app.cpu")
                    .extra_field("type", "user")
                    .unit("secs")
                    .cumulative()
                    .category("CPU")
                    .description("User CPU")
                    .build(),
            )
            .metric(MetricDescriptor::builder("app.mem").category("Memory").build())
            .metric(MetricDescriptor::builder("app.threads").build())
            .metric(MetricDescriptor::builder("app.sys").category("CPU").build())
            .log_field("pid", "The process id");
        registry.get_module_metadata("acme.app").unwrap()
    }

    #[test]
    fn renders_all_sections() {
        let page = render_markdown(&sample());

        assert!(page.starts_with("# acme.app\n\nApplication metrics.\n"));
        assert!(page.contains("| `pid` | yes | int |  | Process id \\| or name |"));
        assert!(page.contains("| `interval` | no |  | 30 |  |"));
        assert!(page.contains("| `app.cpu` | `type=user` | secs | yes | User CPU |"));
        assert!(page.contains("## Log fields"));
        assert!(page.contains("| `pid` | The process id |"));
    }

    #[test]
    fn categories_keep_first_seen_order() {
        let page = render_markdown(&sample());

        let threads = page.find("app.threads").unwrap();
        let cpu = page.find("### CPU").unwrap();
        let memory = page.find("### Memory").unwrap();
        let sys = page.find("app.sys").unwrap();

        assert!(threads < cpu);
        assert!(cpu < sys && sys < memory);
    }

    #[test]
    fn empty_sections_are_omitted() {
        let registry = MetadataRegistry::new();
        registry.set_description("bare", "Nothing else.");
        let page = render_markdown(&registry.get_module_metadata("bare").unwrap());

        assert_eq!(page, "# bare\n\nNothing else.\n");
    }
}
