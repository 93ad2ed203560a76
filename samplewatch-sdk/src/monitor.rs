//! The capability a monitor plugin implements.

use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::error::SampleError;
use crate::runtime::MonitorContext;
use crate::sink::RateLimit;

/// A monitor plugin.
///
/// Implementors supply [`gather_sample`](Monitor::gather_sample), which the
/// runtime calls once per sample interval on the monitor's own thread.
/// Records are emitted through the context as a side effect.
///
/// # Example
///
/// ```rust
/// use samplewatch_sdk::{Monitor, MonitorContext, SampleError};
/// use samplewatch_types::MetricRecord;
///
/// struct Uptime {
///     ticks: u64,
/// }
///
/// impl Monitor for Uptime {
///     fn gather_sample(&mut self, ctx: &MonitorContext) -> Result<(), SampleError> {
///         self.ticks += 1;
///         ctx.emit(MetricRecord::new("uptime.ticks", self.ticks as i64))?;
///         Ok(())
///     }
/// }
/// ```
pub trait Monitor: Send {
    /// Gather one sample and emit whatever it produced.
    ///
    /// Errors and panics are counted and logged by the default loop; they
    /// never stop the monitor.
    fn gather_sample(&mut self, ctx: &MonitorContext) -> Result<(), SampleError>;

    /// Write rate limit handed to the sink when the output is opened.
    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    /// The monitor's whole loop.
    ///
    /// Override to replace the default sampling loop entirely. An override
    /// owns error counting and interval handling, and should return promptly
    /// once [`MonitorContext::is_stopped`] turns true. An error returned from
    /// here is logged as fatal and ends the monitor.
    fn run(&mut self, ctx: &MonitorContext) -> Result<(), SampleError> {
        run_sampling_loop(self, ctx)
    }
}

/// The default sampling loop.
///
/// Calls `gather_sample` while the monitor is running, counting and logging
/// each failure, then sleeps for the sample interval or until stopped.
pub fn run_sampling_loop<M: Monitor + ?Sized>(
    monitor: &mut M,
    ctx: &MonitorContext,
) -> Result<(), SampleError> {
    while !ctx.is_stopped() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| monitor.gather_sample(ctx)))
            .unwrap_or_else(|payload| Err(SampleError::Panic(panic_message(payload.as_ref()))));

        if let Err(e) = result {
            error!(monitor = %ctx.name(), error = %e, "failed to gather sample");
            ctx.log_error(&format!("Failed to gather sample due to the following error: {}", e));
            ctx.increment_counter(0, 1);
        }

        ctx.sleep_but_awaken_if_stopped(ctx.sample_interval());
    }
    Ok(())
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
