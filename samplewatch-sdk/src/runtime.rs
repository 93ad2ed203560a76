//! The monitor runtime: lifecycle state machine, sampling thread and counters.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use samplewatch_types::{MetricRecord, Value, ValueType};
use tracing::{debug, error, info, info_span, warn};

use crate::catalog::MonitorCatalog;
use crate::config::{coerce, ConfigDocument, GetOptions, MonitorConfig, MODULE_FIELD};
use crate::error::{ConfigError, MonitorError, RuntimeError};
use crate::monitor::{panic_message, Monitor};
use crate::registry::MetadataRegistry;
use crate::sink::{Output, RateLimit, Sink};

/// Sample interval used when neither the builder nor the configuration sets one.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration key that overrides the sample interval, in seconds.
pub const SAMPLE_INTERVAL_FIELD: &str = "sample_interval";

/// Lifecycle of a monitor runtime. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    reported_lines: u64,
    errors: u64,
}

struct Shared {
    name: String,
    module: String,
    config: MonitorConfig,
    sink: Arc<dyn Sink>,
    destination: PathBuf,
    rate_limit: RateLimit,
    sample_interval: Mutex<Duration>,
    // State transitions and the interruptible sleep share this lock; the
    // counters have their own so reporting never contends with stop signals.
    run_state: Mutex<RunState>,
    state_changed: Condvar,
    counters: Mutex<Counters>,
    output_open: Mutex<bool>,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        *self.run_state.lock() != RunState::Running
    }

    fn sleep_but_awaken_if_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.run_state.lock();
        while *state == RunState::Running {
            match deadline {
                Some(deadline) => {
                    if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.state_changed.wait(&mut state),
            }
        }
        *state != RunState::Running
    }

    fn increment_counter(&self, reported_lines: u64, errors: u64) {
        let mut counters = self.counters.lock();
        counters.reported_lines += reported_lines;
        counters.errors += errors;
    }

    fn finish(&self) {
        *self.run_state.lock() = RunState::Stopped;
        self.state_changed.notify_all();
    }
}

/// Handle given to a monitor while it runs.
///
/// Cheap to clone; every clone refers to the same runtime.
#[derive(Clone)]
pub struct MonitorContext {
    shared: Arc<Shared>,
}

impl MonitorContext {
    /// The runtime's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The validated configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    pub fn sample_interval(&self) -> Duration {
        *self.shared.sample_interval.lock()
    }

    /// Send a record to the sink and count it as a reported line.
    ///
    /// Records without a monitor name are stamped with this runtime's name.
    pub fn emit(&self, mut record: MetricRecord) -> std::io::Result<()> {
        if record.monitor.is_empty() {
            record.monitor = self.shared.name.clone();
        }
        self.shared.sink.emit(&record)?;
        self.shared.increment_counter(1, 0);
        Ok(())
    }

    /// Add to the reported-lines and error counters.
    pub fn increment_counter(&self, reported_lines: u64, errors: u64) {
        self.shared.increment_counter(reported_lines, errors);
    }

    /// True once a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Sleep for `timeout` or until a stop is requested, whichever is first.
    ///
    /// Returns true if the monitor has been asked to stop.
    pub fn sleep_but_awaken_if_stopped(&self, timeout: Duration) -> bool {
        self.shared.sleep_but_awaken_if_stopped(timeout)
    }

    pub fn log_info(&self, message: &str) {
        self.shared.sink.log_info(message);
    }

    pub fn log_error(&self, message: &str) {
        self.shared.sink.log_error(message);
    }
}

impl std::fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorContext")
            .field("name", &self.shared.name)
            .finish()
    }
}

/// A monitor instance with its own sampling thread.
///
/// # Example
///
/// ```rust,no_run
/// use samplewatch_sdk::{ConfigDocument, MemorySink, Monitor, MonitorContext, MonitorRuntime, SampleError};
/// use samplewatch_types::MetricRecord;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct Ping;
///
/// impl Monitor for Ping {
///     fn gather_sample(&mut self, ctx: &MonitorContext) -> Result<(), SampleError> {
///         ctx.emit(MetricRecord::new("ping", 1))?;
///         Ok(())
///     }
/// }
///
/// let sink = Arc::new(MemorySink::new());
/// let runtime = MonitorRuntime::builder(ConfigDocument::new().with("module", "acme.ping"))
///     .sink(sink.clone())
///     .sample_interval(Duration::from_millis(100))
///     .build(|_config| Ok(Ping))
///     .unwrap();
///
/// runtime.start().unwrap();
/// std::thread::sleep(Duration::from_millis(250));
/// runtime.shutdown(Some(Duration::from_secs(1)));
///
/// assert!(runtime.reported_lines() >= 2);
/// ```
pub struct MonitorRuntime {
    shared: Arc<Shared>,
    monitor: Mutex<Option<Box<dyn Monitor>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorRuntime {
    /// Start building a runtime from a raw configuration document.
    pub fn builder(document: ConfigDocument) -> MonitorRuntimeBuilder<'static> {
        MonitorRuntimeBuilder::new(document)
    }

    /// Build a runtime for the document's module using the catalog's
    /// constructor and the global registry.
    pub fn from_catalog(
        document: ConfigDocument,
        catalog: &MonitorCatalog,
    ) -> Result<MonitorRuntime, MonitorError> {
        Self::builder(document).build_from(catalog)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The plugin module this runtime was built for.
    pub fn module(&self) -> &str {
        &self.shared.module
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.shared.rate_limit
    }

    /// Where the sink is asked to write this monitor's records.
    pub fn destination(&self) -> &Path {
        &self.shared.destination
    }

    pub fn sample_interval(&self) -> Duration {
        *self.shared.sample_interval.lock()
    }

    /// Change the sample interval. Only allowed before `start`.
    pub fn set_sample_interval(&self, interval: Duration) -> Result<(), RuntimeError> {
        let state = self.shared.run_state.lock();
        if *state != RunState::NotStarted {
            return Err(RuntimeError::AlreadyStarted(self.shared.name.clone()));
        }
        *self.shared.sample_interval.lock() = interval;
        Ok(())
    }

    /// A context bound to this runtime, as handed to the monitor when it runs.
    ///
    /// Lets a host drive a plugin's `gather_sample` directly.
    pub fn context(&self) -> MonitorContext {
        MonitorContext {
            shared: self.shared.clone(),
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.shared.run_state.lock()
    }

    /// Number of metric lines reported so far.
    pub fn reported_lines(&self) -> u64 {
        self.shared.counters.lock().reported_lines
    }

    /// Number of errors the monitor has experienced so far.
    pub fn errors(&self) -> u64 {
        self.shared.counters.lock().errors
    }

    /// Add to both counters atomically.
    pub fn increment_counter(&self, reported_lines: u64, errors: u64) {
        self.shared.increment_counter(reported_lines, errors);
    }

    pub fn is_output_open(&self) -> bool {
        *self.shared.output_open.lock()
    }

    /// Open the sink for this monitor. Does nothing if already open.
    pub fn open_output(&self) -> Result<(), RuntimeError> {
        let mut open = self.shared.output_open.lock();
        if *open {
            return Ok(());
        }
        self.shared
            .sink
            .open(&self.shared.name, &self.shared.destination, self.shared.rate_limit)
            .map_err(|source| RuntimeError::OpenOutput {
                name: self.shared.name.clone(),
                source,
            })?;
        *open = true;
        Ok(())
    }

    /// Close the sink. Does nothing if it was never opened.
    pub fn close_output(&self) {
        let mut open = self.shared.output_open.lock();
        if *open {
            self.shared.sink.close();
            *open = false;
        }
    }

    /// Open the output and start sampling on a dedicated thread.
    pub fn start(&self) -> Result<(), RuntimeError> {
        let mut state = self.shared.run_state.lock();
        if *state != RunState::NotStarted {
            return Err(RuntimeError::AlreadyStarted(self.shared.name.clone()));
        }
        self.open_output()?;

        let Some(mut monitor) = self.monitor.lock().take() else {
            return Err(RuntimeError::AlreadyStarted(self.shared.name.clone()));
        };

        // The thread blocks on this lock until Running is published
        *state = RunState::Running;
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("monitor:{}", self.shared.name))
            .spawn(move || run_monitor(shared, monitor.as_mut()));

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                info!(monitor = %self.shared.name, interval = ?self.sample_interval(), "monitor started");
                Ok(())
            }
            Err(source) => {
                *state = RunState::Stopped;
                Err(RuntimeError::Spawn {
                    name: self.shared.name.clone(),
                    source,
                })
            }
        }
    }

    /// Ask the monitor to stop. Safe to call from any thread, any number of times.
    ///
    /// A runtime that was never started goes straight to `Stopped`.
    pub fn stop(&self) {
        let mut state = self.shared.run_state.lock();
        match *state {
            RunState::NotStarted => *state = RunState::Stopped,
            RunState::Running => {
                debug!(monitor = %self.shared.name, "stop requested");
                *state = RunState::StopRequested;
            }
            RunState::StopRequested | RunState::Stopped => {}
        }
        self.shared.state_changed.notify_all();
    }

    /// Wait for the sampling thread to exit.
    ///
    /// Returns true once the runtime is `Stopped`, false on timeout or if
    /// the runtime was never started.
    pub fn join(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        {
            let mut state = self.shared.run_state.lock();
            if *state == RunState::NotStarted {
                return false;
            }
            while *state != RunState::Stopped {
                match deadline {
                    Some(deadline) => {
                        if self.shared.state_changed.wait_until(&mut state, deadline).timed_out() {
                            return false;
                        }
                    }
                    None => self.shared.state_changed.wait(&mut state),
                }
            }
        }

        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        true
    }

    /// Stop, wait for the thread, then close the output.
    ///
    /// The output stays open if the thread does not exit within `timeout`.
    pub fn shutdown(&self, timeout: Option<Duration>) -> bool {
        self.stop();
        let stopped = self.join(timeout);
        if stopped {
            self.close_output();
        } else {
            warn!(monitor = %self.shared.name, "monitor did not stop in time; leaving output open");
        }
        stopped
    }
}

impl Drop for MonitorRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MonitorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRuntime")
            .field("name", &self.shared.name)
            .field("module", &self.shared.module)
            .field("run_state", &self.run_state())
            .field("reported_lines", &self.reported_lines())
            .field("errors", &self.errors())
            .finish()
    }
}

fn run_monitor(shared: Arc<Shared>, monitor: &mut dyn Monitor) {
    let span = info_span!("monitor", name = %shared.name);
    let _enter = span.enter();

    let ctx = MonitorContext {
        shared: shared.clone(),
    };

    let fatal = match panic::catch_unwind(AssertUnwindSafe(|| monitor.run(&ctx))) {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(panic_message(payload.as_ref())),
    };

    match fatal {
        None => shared.sink.log_info("Monitor has finished"),
        Some(message) => {
            error!(error_code = "failedMonitor", error = %message, "monitor died");
            shared
                .sink
                .log_error(&format!("Monitor died due to error: {}", message));
        }
    }

    shared.finish();
}

/// Builder for [`MonitorRuntime`].
///
/// Precedence for the sample interval: an explicit
/// [`sample_interval`](Self::sample_interval), then the document's
/// `sample_interval` value in seconds, then the default interval.
pub struct MonitorRuntimeBuilder<'r> {
    document: ConfigDocument,
    registry: Option<&'r MetadataRegistry>,
    name: Option<String>,
    sink: Option<Arc<dyn Sink>>,
    sample_interval: Option<Duration>,
    default_sample_interval: Duration,
    log_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

impl<'r> MonitorRuntimeBuilder<'r> {
    pub fn new(document: ConfigDocument) -> Self {
        Self {
            document,
            registry: None,
            name: None,
            sink: None,
            sample_interval: None,
            default_sample_interval: DEFAULT_SAMPLE_INTERVAL,
            log_path: None,
            log_dir: None,
        }
    }

    /// Validate against this registry instead of the global one.
    pub fn registry<'a>(self, registry: &'a MetadataRegistry) -> MonitorRuntimeBuilder<'a> {
        MonitorRuntimeBuilder {
            document: self.document,
            registry: Some(registry),
            name: self.name,
            sink: self.sink,
            sample_interval: self.sample_interval,
            default_sample_interval: self.default_sample_interval,
            log_path: self.log_path,
            log_dir: self.log_dir,
        }
    }

    /// Runtime name. Defaults to the module identifier.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sink for records and notices. Defaults to [`Output::File`].
    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Explicit sample interval, taking precedence over the configuration.
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = Some(interval);
        self
    }

    /// Interval used when the configuration has no `sample_interval`.
    pub fn default_sample_interval(mut self, interval: Duration) -> Self {
        self.default_sample_interval = interval;
        self
    }

    /// Output path. Defaults to `<last segment of module>.log`.
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Directory relative output paths are resolved against.
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Build with a typed plugin constructor.
    pub fn build<M, F>(self, factory: F) -> Result<MonitorRuntime, MonitorError>
    where
        M: Monitor + 'static,
        F: FnOnce(&MonitorConfig) -> Result<M, MonitorError>,
    {
        self.build_boxed(|config| factory(config).map(|m| Box::new(m) as Box<dyn Monitor>))
    }

    /// Build using the constructor registered in `catalog` for the document's module.
    ///
    /// The module's metadata is declared into the registry first so the
    /// document is validated against it.
    pub fn build_from(self, catalog: &MonitorCatalog) -> Result<MonitorRuntime, MonitorError> {
        let module = module_of(&self.document)?;
        let constructor = catalog
            .constructor(&module)
            .ok_or_else(|| MonitorError::UnknownModule(module.clone()))?;
        let registry = self.registry.unwrap_or_else(|| MetadataRegistry::global());
        catalog.describe(&module, registry);
        self.build_boxed(constructor)
    }

    /// Build with a constructor returning a boxed plugin.
    pub fn build_boxed<F>(self, factory: F) -> Result<MonitorRuntime, MonitorError>
    where
        F: FnOnce(&MonitorConfig) -> Result<Box<dyn Monitor>, MonitorError>,
    {
        let module = module_of(&self.document)?;
        let registry = self.registry.unwrap_or_else(|| MetadataRegistry::global());
        let config = MonitorConfig::new(self.document, &module, registry)?;

        let sample_interval = match self.sample_interval {
            Some(interval) => interval,
            None => configured_interval(&config, self.default_sample_interval)?,
        };

        let monitor = factory(&config)?;
        let rate_limit = monitor.rate_limit();

        let name = self.name.unwrap_or_else(|| module.clone());
        let mut destination = self.log_path.unwrap_or_else(|| default_log_path(&module));
        if let Some(dir) = self.log_dir.filter(|_| destination.is_relative()) {
            destination = dir.join(destination);
        }

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(Output::File.into_sink()) as Arc<dyn Sink>);

        debug!(monitor = %name, module = %module, ?sample_interval, "monitor constructed");

        Ok(MonitorRuntime {
            shared: Arc::new(Shared {
                name,
                module,
                config,
                sink,
                destination,
                rate_limit,
                sample_interval: Mutex::new(sample_interval),
                run_state: Mutex::new(RunState::NotStarted),
                state_changed: Condvar::new(),
                counters: Mutex::new(Counters::default()),
                output_open: Mutex::new(false),
            }),
            monitor: Mutex::new(Some(monitor)),
            thread: Mutex::new(None),
        })
    }
}

fn module_of(document: &ConfigDocument) -> Result<String, ConfigError> {
    let raw = document
        .get(MODULE_FIELD)
        .cloned()
        .ok_or_else(|| ConfigError::MissingRequiredField(MODULE_FIELD.to_string()))?;
    Ok(coerce(MODULE_FIELD, raw, ValueType::Str)?.to_string())
}

fn configured_interval(config: &MonitorConfig, default: Duration) -> Result<Duration, ConfigError> {
    let options = GetOptions::new()
        .convert_to(ValueType::Float)
        .min_value(0.0)
        .default(default.as_secs_f64());
    let secs = config
        .get(SAMPLE_INTERVAL_FIELD, &options)?
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| default.as_secs_f64());
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidNumericValue {
        field: SAMPLE_INTERVAL_FIELD.to_string(),
        value: Value::Float(secs).to_string(),
        target: ValueType::Float,
    })
}

fn default_log_path(module: &str) -> PathBuf {
    let last = module.rsplit('.').next().unwrap_or(module);
    PathBuf::from(format!("{}.log", last))
}
