//! Docker container monitor.
//!
//! Talks to the Docker Engine API over its Unix socket. Each sample lists the
//! running containers, works out which ones started or stopped since the last
//! sample, and keeps a stdout/stderr log configuration for every container
//! other than the agent's own. Log files are placed under the `log_dir`
//! option, which the agent fills in from its own log directory.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use samplewatch_sdk::{
    MetadataRegistry, Monitor, MonitorConfig, MonitorContext, MonitorError, SampleError,
};
use samplewatch_types::{MetricDescriptor, MetricRecord, OptionDescriptor, ValueType};
use tracing::{debug, info};

use crate::AdapterError;

/// Module identifier used in configuration documents.
pub const MODULE: &str = "samplewatch.builtin.docker";

const DEFAULT_CONTAINER_NAME: &str = "samplewatch-agent";
const DEFAULT_API_SOCKET: &str = "/var/run/docker.sock";
const DEFAULT_LOG_PREFIX: &str = "docker";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Declare the module's options, metrics and log fields.
pub fn declare(registry: &MetadataRegistry) {
    registry
        .module(MODULE)
        .description(
            "Tracks the containers running under the local Docker daemon.\n\n\
             The API socket must be reachable from the agent. When the agent runs in a \
             container, map the host socket in with `-v /run/docker.sock:/var/run/docker.sock` \
             and start the agent container with the name given by `container_name`.",
        )
        .option(
            OptionDescriptor::builder("module")
                .description("Always `samplewatch.builtin.docker`")
                .required()
                .convert_to(ValueType::Str)
                .build(),
        )
        .option(
            OptionDescriptor::builder("container_name")
                .description(
                    "Name of the container the agent runs in. That container is left out of \
                     the report. Set to an empty string when the agent runs on the host.",
                )
                .convert_to(ValueType::Str)
                .default(DEFAULT_CONTAINER_NAME)
                .build(),
        )
        .option(
            OptionDescriptor::builder("api_socket")
                .description("Unix socket of the Docker Engine API.")
                .convert_to(ValueType::Str)
                .default(DEFAULT_API_SOCKET)
                .build(),
        )
        .option(
            OptionDescriptor::builder("docker_log_prefix")
                .description("Prefix added to the start of every container log file name.")
                .convert_to(ValueType::Str)
                .default(DEFAULT_LOG_PREFIX)
                .build(),
        )
        .option(
            OptionDescriptor::builder("log_dir")
                .description(
                    "Directory container log files are placed in. Defaults to the agent's \
                     `log_dir`; relative file names are used when neither is set.",
                )
                .convert_to(ValueType::Str)
                .build(),
        )
        .metric(
            MetricDescriptor::builder("docker.containers.running")
                .description("Containers running, not counting the agent's own.")
                .build(),
        )
        .log_field("container", "Name of the container that started or stopped.")
        .log_field("container_id", "Id of the container that started or stopped.");
}

/// Build the monitor; fails unless `api_socket` is a Unix socket.
pub fn construct(config: &MonitorConfig) -> Result<Box<dyn Monitor>, MonitorError> {
    let settings = DockerSettings {
        container_name: config
            .get_str("container_name")
            .unwrap_or(DEFAULT_CONTAINER_NAME)
            .to_string(),
        api_socket: PathBuf::from(config.get_str("api_socket").unwrap_or(DEFAULT_API_SOCKET)),
        log_prefix: config
            .get_str("docker_log_prefix")
            .unwrap_or(DEFAULT_LOG_PREFIX)
            .to_string(),
        log_dir: config.get_str("log_dir").map(PathBuf::from),
    };
    DockerMonitor::new(settings).map(|m| Box::new(m) as Box<dyn Monitor>)
}

/// Settings for [`DockerMonitor`].
#[derive(Debug, Clone)]
pub struct DockerSettings {
    pub container_name: String,
    pub api_socket: PathBuf,
    pub log_prefix: String,
    /// Directory relative container log paths are resolved against.
    pub log_dir: Option<PathBuf>,
}

/// Which output stream of a container a log configuration follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }

    fn parser(self) -> &'static str {
        match self {
            Stream::Stdout => "dockerStdout",
            Stream::Stderr => "dockerStderr",
        }
    }
}

/// Where one container stream's log lines should be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLogConfig {
    pub container_id: String,
    pub stream: Stream,
    pub parser: &'static str,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "Id")]
    id: String,
}

/// Minimal HTTP/1.0 client for the Docker Engine API.
#[derive(Debug, Clone)]
struct DockerClient {
    socket: PathBuf,
}

impl DockerClient {
    /// Issue `GET path` and return the status code and body.
    fn get(&self, path: &str) -> Result<(u16, String), AdapterError> {
        let mut stream = UnixStream::connect(&self.socket)?;
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;
        write!(stream, "GET {} HTTP/1.0\r\n\r\n", path)?;

        // HTTP/1.0: the daemon closes the connection after the body
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        parse_response(&response)
    }

    fn get_ok(&self, path: &str) -> Result<String, AdapterError> {
        match self.get(path)? {
            (200, body) => Ok(body),
            (status, _) => Err(AdapterError::Http {
                path: path.to_string(),
                status,
            }),
        }
    }

    fn container_id(&self, name: &str) -> Result<String, AdapterError> {
        match self.get(&format!("/containers/{}/json", name))? {
            (200, body) => Ok(serde_json::from_str::<ContainerInspect>(&body)?.id),
            _ => Err(AdapterError::ContainerNotFound(name.to_string())),
        }
    }

    /// Running containers keyed by id, mapped to their name.
    fn running_containers(&self) -> Result<BTreeMap<String, String>, AdapterError> {
        let body = self.get_ok("/containers/json")?;
        let containers: Vec<ContainerSummary> = serde_json::from_str(&body)?;
        Ok(containers
            .into_iter()
            .map(|c| {
                let name = c
                    .names
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| c.id.clone());
                (c.id, name)
            })
            .collect())
    }
}

fn parse_response(response: &str) -> Result<(u16, String), AdapterError> {
    let (head, body) = response
        .split_once("\r\n\r\n")
        .unwrap_or((response, ""));
    let status_line = head.lines().next().unwrap_or_default();

    let mut parts = status_line.split_whitespace();
    let status = match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP") => code.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| AdapterError::Parse(format!("bad status line: {:?}", status_line)))?;

    Ok((status, body.to_string()))
}

/// Monitors the containers running under the local Docker daemon.
#[derive(Debug)]
pub struct DockerMonitor {
    settings: DockerSettings,
    client: DockerClient,
    own_container_id: Option<String>,
    containers: BTreeMap<String, String>,
    log_configs: Vec<ContainerLogConfig>,
}

impl DockerMonitor {
    pub fn new(settings: DockerSettings) -> Result<Self, MonitorError> {
        check_socket(&settings.api_socket)?;
        Ok(Self {
            client: DockerClient {
                socket: settings.api_socket.clone(),
            },
            settings,
            own_container_id: None,
            containers: BTreeMap::new(),
            log_configs: Vec::new(),
        })
    }

    fn own_container_id(&mut self) -> Result<Option<&str>, AdapterError> {
        if self.own_container_id.is_none() && !self.settings.container_name.is_empty() {
            let id = self.client.container_id(&self.settings.container_name)?;
            debug!(container = %self.settings.container_name, id = %id, "resolved agent container");
            self.own_container_id = Some(id);
        }
        Ok(self.own_container_id.as_deref())
    }

    fn log_configs_for(&self, id: &str, name: &str) -> [ContainerLogConfig; 2] {
        [Stream::Stdout, Stream::Stderr].map(|stream| {
            let file = PathBuf::from(format!(
                "{}-{}-{}.log",
                self.settings.log_prefix,
                name,
                stream.as_str()
            ));
            let path = match &self.settings.log_dir {
                Some(base) if file.is_relative() => base.join(file),
                _ => file,
            };
            ContainerLogConfig {
                container_id: id.to_string(),
                stream,
                parser: stream.parser(),
                path,
            }
        })
    }

    fn update(&mut self, ctx: &MonitorContext) -> Result<usize, AdapterError> {
        let own = self.own_container_id()?.map(str::to_string);
        let mut running = self.client.running_containers()?;
        if let Some(own) = &own {
            running.remove(own);
        }

        let stopped: Vec<(String, String)> = self
            .containers
            .iter()
            .filter(|(id, _)| !running.contains_key(*id))
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();
        let started: Vec<(String, String)> = running
            .iter()
            .filter(|(id, _)| !self.containers.contains_key(*id))
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();

        for (id, name) in &stopped {
            info!(container = %name, container_id = %id, "container stopped");
            ctx.log_info(&format!("Stopping logger for container '{}'", name));
            self.log_configs.retain(|c| &c.container_id != id);
        }
        for (id, name) in &started {
            info!(container = %name, container_id = %id, "container started");
            let configs = self.log_configs_for(id, name);
            ctx.log_info(&format!(
                "Starting logger for container '{}' ({}, {})",
                name,
                configs[0].path.display(),
                configs[1].path.display()
            ));
            self.log_configs.extend(configs);
        }

        self.containers = running;
        Ok(self.containers.len())
    }
}

impl Monitor for DockerMonitor {
    fn gather_sample(&mut self, ctx: &MonitorContext) -> Result<(), SampleError> {
        let running = self.update(ctx)?;
        ctx.emit(MetricRecord::new("docker.containers.running", running as i64))?;
        Ok(())
    }
}

fn check_socket(path: &Path) -> Result<(), MonitorError> {
    let is_socket = std::fs::metadata(path)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false);
    if is_socket {
        Ok(())
    } else {
        Err(MonitorError::unsupported(
            MODULE,
            format!(
                "the file '{}' given by 'api_socket' does not exist or is not a socket; \
                 map the docker socket from the host into this container",
                path.display()
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use samplewatch_sdk::{ConfigDocument, MemorySink, MonitorRuntime};
    use samplewatch_types::Value;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;
    use std::sync::Arc;
    use std::thread;

    /// Serves canned Docker API responses from a socket in a temp dir.
    struct FakeDaemon {
        _dir: tempfile::TempDir,
        socket: PathBuf,
        containers: Arc<Mutex<String>>,
    }

    impl FakeDaemon {
        fn start(own: Option<&str>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let socket = dir.path().join("docker.sock");
            let listener = UnixListener::bind(&socket).unwrap();
            let containers = Arc::new(Mutex::new("[]".to_string()));
            let own = own.map(str::to_string);

            let served = containers.clone();
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };

                    // Drain the whole request so closing doesn't reset the client
                    let mut reader = BufReader::new(&stream);
                    let mut request_line = String::new();
                    let _ = reader.read_line(&mut request_line);
                    loop {
                        let mut header = String::new();
                        match reader.read_line(&mut header) {
                            Ok(n) if n > 0 && header.trim().is_empty() => break,
                            Ok(n) if n > 0 => continue,
                            _ => break,
                        }
                    }
                    let path = request_line.split_whitespace().nth(1).unwrap_or("").to_string();

                    let (status, body) = match (path.as_str(), &own) {
                        ("/containers/json", _) => ("200 OK", served.lock().clone()),
                        ("/containers/samplewatch-agent/json", Some(id)) => {
                            ("200 OK", format!(r#"{{"Id": "{}"}}"#, id))
                        }
                        _ => ("404 Not Found", r#"{"message": "no such container"}"#.to_string()),
                    };
                    let _ = write!(
                        stream,
                        "HTTP/1.0 {}\r\nContent-Type: application/json\r\n\r\n{}",
                        status, body
                    );
                }
            });

            Self {
                _dir: dir,
                socket,
                containers,
            }
        }

        fn set_containers(&self, containers: &[(&str, &str)]) {
            let list: Vec<_> = containers
                .iter()
                .map(|(id, name)| serde_json::json!({"Id": id, "Names": [format!("/{}", name)]}))
                .collect();
            *self.containers.lock() = serde_json::to_string(&list).unwrap();
        }

        fn settings(&self, container_name: &str) -> DockerSettings {
            DockerSettings {
                container_name: container_name.to_string(),
                api_socket: self.socket.clone(),
                log_prefix: "docker".to_string(),
                log_dir: Some(PathBuf::from("/var/log/samplewatch")),
            }
        }
    }

    struct Noop;

    impl Monitor for Noop {
        fn gather_sample(&mut self, _ctx: &MonitorContext) -> Result<(), SampleError> {
            Ok(())
        }
    }

    /// A context whose records and notices land in `sink`.
    fn context(sink: &Arc<MemorySink>) -> MonitorContext {
        MonitorRuntime::builder(ConfigDocument::new().with("module", MODULE))
            .registry(&MetadataRegistry::new())
            .sink(sink.clone())
            .build(|_| Ok(Noop))
            .unwrap()
            .context()
    }

    #[test]
    fn parses_status_and_body() {
        let (status, body) =
            parse_response("HTTP/1.1 200 OK\r\nServer: Docker\r\n\r\n[{\"Id\": \"a\"}]").unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "[{\"Id\": \"a\"}]");

        assert!(matches!(parse_response("garbage"), Err(AdapterError::Parse(_))));
    }

    #[test]
    fn regular_file_is_not_a_socket() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let settings = DockerSettings {
            container_name: String::new(),
            api_socket: file.path().to_path_buf(),
            log_prefix: "docker".to_string(),
            log_dir: None,
        };
        assert!(matches!(
            DockerMonitor::new(settings),
            Err(MonitorError::UnsupportedEnvironment { .. })
        ));
    }

    #[test]
    fn construct_uses_declared_defaults() {
        let registry = MetadataRegistry::new();
        declare(&registry);
        let config = MonitorConfig::new(
            ConfigDocument::new()
                .with("module", MODULE)
                .with("api_socket", "/nonexistent/docker.sock"),
            MODULE,
            &registry,
        )
        .unwrap();

        assert_eq!(config.get_str("container_name"), Some("samplewatch-agent"));
        assert_eq!(config.get_str("docker_log_prefix"), Some("docker"));
        assert_eq!(config.get_str("log_dir"), None);
        assert!(matches!(
            construct(&config),
            Err(MonitorError::UnsupportedEnvironment { .. })
        ));
    }

    #[test]
    fn tracks_started_and_stopped_containers() {
        let daemon = FakeDaemon::start(Some("self"));
        let mut monitor = DockerMonitor::new(daemon.settings("samplewatch-agent")).unwrap();

        let sink = Arc::new(MemorySink::new());
        let ctx = context(&sink);

        daemon.set_containers(&[("self", "samplewatch-agent"), ("a1", "web"), ("b2", "db")]);
        monitor.gather_sample(&ctx).unwrap();

        assert_eq!(monitor.containers.len(), 2);
        assert_eq!(monitor.log_configs.len(), 4);
        assert!(monitor.log_configs.contains(&ContainerLogConfig {
            container_id: "a1".to_string(),
            stream: Stream::Stderr,
            parser: "dockerStderr",
            path: PathBuf::from("/var/log/samplewatch/docker-web-stderr.log"),
        }));

        daemon.set_containers(&[("self", "samplewatch-agent"), ("b2", "db"), ("c3", "cache")]);
        monitor.gather_sample(&ctx).unwrap();

        let mut ids: Vec<_> = monitor.log_configs.iter().map(|c| c.container_id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids, vec!["b2", "c3"]);

        let infos = sink.infos();
        assert!(infos.contains(
            &"Starting logger for container 'web' (/var/log/samplewatch/docker-web-stdout.log, \
              /var/log/samplewatch/docker-web-stderr.log)"
                .to_string()
        ));
        assert!(infos.contains(&"Stopping logger for container 'web'".to_string()));
        assert!(infos
            .iter()
            .any(|m| m.starts_with("Starting logger for container 'cache' (")));

        // Same container set logs nothing new
        let notices = sink.infos().len();
        monitor.gather_sample(&ctx).unwrap();
        assert_eq!(sink.infos().len(), notices);

        let counts: Vec<Value> = sink.records().into_iter().map(|r| r.value).collect();
        assert_eq!(counts, vec![Value::Long(2), Value::Long(2), Value::Long(2)]);
    }

    #[test]
    fn construct_places_logs_under_log_dir() {
        let daemon = FakeDaemon::start(None);
        daemon.set_containers(&[("a1", "web")]);

        let registry = MetadataRegistry::new();
        declare(&registry);
        let config = MonitorConfig::new(
            ConfigDocument::new()
                .with("module", MODULE)
                .with("container_name", "")
                .with("api_socket", daemon.socket.to_string_lossy().into_owned())
                .with("log_dir", "/srv/logs"),
            MODULE,
            &registry,
        )
        .unwrap();

        let mut monitor = construct(&config).unwrap();
        let sink = Arc::new(MemorySink::new());
        monitor.gather_sample(&context(&sink)).unwrap();

        assert_eq!(
            sink.infos(),
            vec!["Starting logger for container 'web' (/srv/logs/docker-web-stdout.log, \
                  /srv/logs/docker-web-stderr.log)"
                .to_string()]
        );
    }

    #[test]
    fn missing_agent_container_fails_the_sample() {
        let daemon = FakeDaemon::start(None);
        let mut monitor = DockerMonitor::new(daemon.settings("samplewatch-agent")).unwrap();
        let sink = Arc::new(MemorySink::new());

        let err = monitor.gather_sample(&context(&sink)).unwrap_err();
        assert!(err.to_string().contains("samplewatch-agent"));
    }

    #[test]
    fn empty_container_name_reports_everything() {
        let daemon = FakeDaemon::start(None);
        daemon.set_containers(&[("a1", "web")]);
        let mut monitor = DockerMonitor::new(daemon.settings("")).unwrap();
        let sink = Arc::new(MemorySink::new());

        monitor.gather_sample(&context(&sink)).unwrap();
        assert_eq!(monitor.containers.get("a1").map(String::as_str), Some("web"));
        assert_eq!(sink.records()[0].value, Value::Long(1));
    }
}
