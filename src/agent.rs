//! Agent configuration and the set of monitors it runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use samplewatch_sdk::{
    ConfigDocument, MetadataRegistry, MonitorCatalog, MonitorRuntime, Value, MODULE_FIELD,
};
use serde::Deserialize;
use tracing::{info, warn};

/// Document key distinguishing several instances of one module.
pub const ID_FIELD: &str = "id";

/// Option a module declares to receive the agent's log directory.
pub const LOG_DIR_FIELD: &str = "log_dir";

fn default_sample_interval() -> f64 {
    samplewatch_sdk::DEFAULT_SAMPLE_INTERVAL.as_secs_f64()
}

/// The agent configuration file.
///
/// ```toml
/// default_sample_interval = 30
/// log_dir = "/var/log/samplewatch"
///
/// [[monitors]]
/// module = "samplewatch.builtin.loadavg"
/// sample_interval = 10
///
/// [[monitors]]
/// module = "samplewatch.builtin.docker"
/// container_name = ""
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Seconds between samples for monitors that do not set `sample_interval`.
    #[serde(default = "default_sample_interval")]
    pub default_sample_interval: f64,

    /// Directory monitor output files are written to.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// One flat table per monitor instance.
    #[serde(default)]
    pub monitors: Vec<ConfigDocument>,
}

impl AgentConfig {
    /// Load from a file, with `SAMPLEWATCH__*` environment variables layered on top.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("SAMPLEWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read agent config {}", path.display()))?;

        let agent: AgentConfig = config
            .try_deserialize()
            .with_context(|| format!("Invalid agent config {}", path.display()))?;

        if !agent.default_sample_interval.is_finite() || agent.default_sample_interval < 0.0 {
            bail!(
                "default_sample_interval must be a non-negative number of seconds, got {}",
                agent.default_sample_interval
            );
        }
        Ok(agent)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs_f64(self.default_sample_interval)
    }
}

/// Name for a monitor instance: the module, or `module(id)` when an id is set.
pub fn instance_name(document: &ConfigDocument) -> Option<String> {
    let module = document.get(MODULE_FIELD)?.to_string();
    Some(match document.get(ID_FIELD) {
        None => module,
        Some(Value::Text(id)) if id.is_empty() => module,
        Some(id) => format!("{}({})", module, id),
    })
}

/// Build every configured monitor without starting any of them.
///
/// Modules declaring a `log_dir` option get the agent's log directory unless
/// their document sets one. The first configuration or environment error
/// aborts the whole set.
pub fn build_runtimes(
    agent: &AgentConfig,
    catalog: &MonitorCatalog,
    registry: &MetadataRegistry,
    log_dir: Option<&Path>,
) -> Result<Vec<MonitorRuntime>> {
    let log_dir = log_dir.or(agent.log_dir.as_deref());
    if agent.monitors.is_empty() {
        warn!("no monitors configured");
    }

    let mut runtimes = Vec::with_capacity(agent.monitors.len());
    for (index, document) in agent.monitors.iter().enumerate() {
        let Some(name) = instance_name(document) else {
            bail!("Monitor #{} is missing the \"{}\" field", index + 1, MODULE_FIELD);
        };

        let mut document = document.clone();
        let module = document.get(MODULE_FIELD).and_then(Value::as_str);
        if let (Some(dir), Some(module)) = (log_dir, module) {
            let wants_log_dir = catalog
                .describe(module, registry)
                .is_some_and(|meta| meta.option(LOG_DIR_FIELD).is_some());
            if wants_log_dir && !document.contains_key(LOG_DIR_FIELD) {
                document.insert(LOG_DIR_FIELD, dir.to_string_lossy().into_owned());
            }
        }

        let mut builder = MonitorRuntime::builder(document)
            .registry(registry)
            .name(name.clone())
            .default_sample_interval(agent.default_interval());
        if let Some(dir) = log_dir {
            builder = builder.log_dir(dir);
        }

        let runtime = builder
            .build_from(catalog)
            .with_context(|| format!("Failed to configure monitor {}", name))?;
        info!(
            monitor = %runtime.name(),
            destination = %runtime.destination().display(),
            interval = ?runtime.sample_interval(),
            "configured monitor"
        );
        runtimes.push(runtime);
    }
    Ok(runtimes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("agent.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_monitors_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
default_sample_interval = 5

[[monitors]]
module = "samplewatch.builtin.loadavg"
sample_interval = 1
proc_path = "/proc/loadavg"

[[monitors]]
module = "samplewatch.builtin.docker"
container_name = ""
"#,
        );

        let agent = AgentConfig::load(&path).unwrap();
        assert_eq!(agent.default_interval(), Duration::from_secs(5));
        assert_eq!(agent.monitors.len(), 2);
        assert_eq!(
            agent.monitors[0].get("module"),
            Some(&Value::from("samplewatch.builtin.loadavg"))
        );
        assert_eq!(agent.monitors[0].get("sample_interval"), Some(&Value::Int(1)));
        assert_eq!(agent.monitors[1].get("container_name"), Some(&Value::from("")));
    }

    #[test]
    fn monitor_keys_keep_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[[monitors]]
module = "samplewatch.builtin.docker"
zeta = 1
api_socket = "/var/run/docker.sock"
mid = true
alpha = "x"
container_name = ""
"#,
        );

        let agent = AgentConfig::load(&path).unwrap();
        let keys: Vec<_> = agent.monitors[0].keys().collect();
        assert_eq!(
            keys,
            vec!["module", "zeta", "api_socket", "mid", "alpha", "container_name"]
        );
    }

    #[test]
    fn defaults_apply_when_keys_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "");

        let agent = AgentConfig::load(&path).unwrap();
        assert_eq!(agent.default_interval(), Duration::from_secs(30));
        assert!(agent.monitors.is_empty());
        assert!(agent.log_dir.is_none());
    }

    #[test]
    fn negative_default_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "default_sample_interval = -2\n");
        assert!(AgentConfig::load(&path).is_err());
    }

    #[test]
    fn instance_names() {
        let doc = ConfigDocument::new().with("module", "a.b");
        assert_eq!(instance_name(&doc).as_deref(), Some("a.b"));
        assert_eq!(instance_name(&doc.clone().with("id", "x")).as_deref(), Some("a.b(x)"));
        assert_eq!(instance_name(&doc.clone().with("id", 2)).as_deref(), Some("a.b(2)"));
        assert_eq!(instance_name(&ConfigDocument::new()), None);
    }

    #[test]
    fn log_dir_reaches_modules_that_declare_it() {
        use samplewatch_sdk::{
            Monitor, MonitorConfig, MonitorContext, MonitorError, OptionDescriptor, SampleError,
            ValueType,
        };

        struct Idle;
        impl Monitor for Idle {
            fn gather_sample(&mut self, _ctx: &MonitorContext) -> Result<(), SampleError> {
                Ok(())
            }
        }

        fn declare_files(registry: &MetadataRegistry) {
            registry.module("acme.files").option(
                OptionDescriptor::builder("log_dir")
                    .convert_to(ValueType::Str)
                    .build(),
            );
        }
        fn declare_plain(registry: &MetadataRegistry) {
            registry.module("acme.plain").description("no log_dir option");
        }
        fn construct(_config: &MonitorConfig) -> Result<Box<dyn Monitor>, MonitorError> {
            Ok(Box::new(Idle))
        }

        let mut catalog = MonitorCatalog::new();
        catalog.register("acme.files", declare_files, construct);
        catalog.register("acme.plain", declare_plain, construct);

        let dir = tempfile::tempdir().unwrap();
        let agent = AgentConfig {
            default_sample_interval: 30.0,
            log_dir: Some(dir.path().to_path_buf()),
            monitors: vec![
                ConfigDocument::new().with("module", "acme.files"),
                ConfigDocument::new()
                    .with("module", "acme.files")
                    .with("id", "own")
                    .with("log_dir", "/elsewhere"),
                ConfigDocument::new().with("module", "acme.plain"),
            ],
        };

        let runtimes = build_runtimes(&agent, &catalog, &MetadataRegistry::new(), None).unwrap();
        let expected = dir.path().to_string_lossy().into_owned();
        assert_eq!(runtimes[0].config().get_str("log_dir"), Some(expected.as_str()));
        assert_eq!(runtimes[1].config().get_str("log_dir"), Some("/elsewhere"));
        assert!(!runtimes[2].config().contains_key("log_dir"));
    }

    #[test]
    fn one_bad_monitor_aborts_the_set() {
        let dir = tempfile::tempdir().unwrap();
        let proc_file = dir.path().join("loadavg");
        fs::write(&proc_file, "0.1 0.2 0.3 1/10 100\n").unwrap();

        let agent = AgentConfig {
            default_sample_interval: 30.0,
            log_dir: Some(dir.path().to_path_buf()),
            monitors: vec![
                ConfigDocument::new()
                    .with("module", "samplewatch.builtin.loadavg")
                    .with("proc_path", proc_file.to_string_lossy().into_owned()),
                ConfigDocument::new().with("module", "acme.unknown"),
            ],
        };
        let catalog = samplewatch_adapters::builtin_catalog();

        let err = build_runtimes(&agent, &catalog, &MetadataRegistry::new(), None).unwrap_err();
        assert!(format!("{:#}", err).contains("acme.unknown"));

        let ok = AgentConfig {
            monitors: agent.monitors[..1].to_vec(),
            ..agent
        };
        let runtimes = build_runtimes(&ok, &catalog, &MetadataRegistry::new(), None).unwrap();
        assert_eq!(runtimes.len(), 1);
        assert_eq!(runtimes[0].destination(), dir.path().join("loadavg.log"));
        assert_eq!(runtimes[0].sample_interval(), Duration::from_secs(30));
    }
}
