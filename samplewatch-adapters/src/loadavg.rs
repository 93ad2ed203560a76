//! System load average monitor.
//!
//! Reads the kernel's `/proc/loadavg` once per sample and emits the three
//! load averages plus the scheduler's runnable and total task counts.

use std::fs;
use std::path::PathBuf;

use samplewatch_sdk::{
    MetadataRegistry, Monitor, MonitorConfig, MonitorContext, MonitorError, SampleError,
};
use samplewatch_types::{MetricDescriptor, MetricRecord, OptionDescriptor, ValueType};
use tracing::debug;

use crate::AdapterError;

/// Module identifier used in configuration documents.
pub const MODULE: &str = "samplewatch.builtin.loadavg";

const DEFAULT_PROC_PATH: &str = "/proc/loadavg";

/// One parsed line of `/proc/loadavg`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
    pub running: i64,
    pub total: i64,
}

impl LoadAverage {
    /// Parse `"0.20 0.18 0.12 1/80 11206"`.
    pub fn parse(line: &str) -> Result<Self, AdapterError> {
        let bad = || AdapterError::Parse(format!("unexpected loadavg line: {:?}", line.trim()));

        let mut parts = line.split_whitespace();
        let mut next_float = || -> Result<f64, AdapterError> {
            parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)
        };
        let one = next_float()?;
        let five = next_float()?;
        let fifteen = next_float()?;

        let (running, total): (i64, i64) = parts
            .next()
            .and_then(|p| p.split_once('/'))
            .and_then(|(r, t)| Some((r.parse().ok()?, t.parse().ok()?)))
            .ok_or_else(bad)?;

        Ok(Self {
            one,
            five,
            fifteen,
            running,
            total,
        })
    }
}

/// Declare the module's options and metrics.
pub fn declare(registry: &MetadataRegistry) {
    registry
        .module(MODULE)
        .description(
            "Reports the system load averages and task counts from `/proc/loadavg`.\n\n\
             Only available on Linux and other systems exposing a procfs.",
        )
        .option(
            OptionDescriptor::builder("module")
                .description("Always `samplewatch.builtin.loadavg`")
                .required()
                .convert_to(ValueType::Str)
                .build(),
        )
        .option(
            OptionDescriptor::builder("proc_path")
                .description("Path of the loadavg file to read.")
                .convert_to(ValueType::Str)
                .default(DEFAULT_PROC_PATH)
                .build(),
        )
        .metric(
            MetricDescriptor::builder("loadavg.1m")
                .description("Load average over the last minute.")
                .category("Load")
                .build(),
        )
        .metric(
            MetricDescriptor::builder("loadavg.5m")
                .description("Load average over the last five minutes.")
                .category("Load")
                .build(),
        )
        .metric(
            MetricDescriptor::builder("loadavg.15m")
                .description("Load average over the last fifteen minutes.")
                .category("Load")
                .build(),
        )
        .metric(
            MetricDescriptor::builder("proc.running")
                .description("Runnable scheduling entities.")
                .category("Tasks")
                .build(),
        )
        .metric(
            MetricDescriptor::builder("proc.total")
                .description("Scheduling entities that currently exist.")
                .category("Tasks")
                .build(),
        );
}

/// Build the monitor; fails when the loadavg file cannot be read.
pub fn construct(config: &MonitorConfig) -> Result<Box<dyn Monitor>, MonitorError> {
    let proc_path = PathBuf::from(config.get_str("proc_path").unwrap_or(DEFAULT_PROC_PATH));
    LoadAvgMonitor::new(proc_path).map(|m| Box::new(m) as Box<dyn Monitor>)
}

/// Emits load averages read from a procfs file.
#[derive(Debug)]
pub struct LoadAvgMonitor {
    proc_path: PathBuf,
}

impl LoadAvgMonitor {
    pub fn new(proc_path: impl Into<PathBuf>) -> Result<Self, MonitorError> {
        let proc_path = proc_path.into();
        if let Err(e) = fs::read_to_string(&proc_path) {
            return Err(MonitorError::unsupported(
                MODULE,
                format!("cannot read {}: {}", proc_path.display(), e),
            ));
        }
        Ok(Self { proc_path })
    }

    fn read(&self) -> Result<LoadAverage, AdapterError> {
        let line = fs::read_to_string(&self.proc_path)?;
        LoadAverage::parse(&line)
    }
}

impl Monitor for LoadAvgMonitor {
    fn gather_sample(&mut self, ctx: &MonitorContext) -> Result<(), SampleError> {
        let load = self.read()?;
        debug!(one = load.one, running = load.running, "read load average");

        ctx.emit(MetricRecord::new("loadavg.1m", load.one))?;
        ctx.emit(MetricRecord::new("loadavg.5m", load.five))?;
        ctx.emit(MetricRecord::new("loadavg.15m", load.fifteen))?;
        ctx.emit(MetricRecord::new("proc.running", load.running))?;
        ctx.emit(MetricRecord::new("proc.total", load.total))?;
        Ok(())
    }
}
