//! # samplewatch-adapters
//!
//! Built-in monitor plugins for samplewatch.
//!
//! Each plugin lives behind a cargo feature and exposes a `MODULE`
//! identifier, a `declare` function for its metadata and a `construct`
//! function for the catalog.
//!
//! ## Supported Monitors
//!
//! - **loadavg** (`loadavg` feature): system load averages from `/proc/loadavg`
//! - **docker** (`docker` feature, Unix only): running containers via the
//!   Docker Engine API socket
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use samplewatch_adapters::builtin_catalog;
//! use samplewatch_sdk::{ConfigDocument, MonitorRuntime};
//!
//! let catalog = builtin_catalog();
//! let runtime = MonitorRuntime::from_catalog(
//!     ConfigDocument::new().with("module", "samplewatch.builtin.loadavg"),
//!     &catalog,
//! )?;
//! runtime.start()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;

#[cfg(feature = "loadavg")]
pub mod loadavg;

#[cfg(all(feature = "docker", unix))]
pub mod docker;

pub use error::AdapterError;

use samplewatch_sdk::MonitorCatalog;

/// Add every plugin compiled into this crate to `catalog`.
pub fn register_builtin(catalog: &mut MonitorCatalog) {
    #[cfg(feature = "loadavg")]
    catalog.register(loadavg::MODULE, loadavg::declare, loadavg::construct);

    #[cfg(all(feature = "docker", unix))]
    catalog.register(docker::MODULE, docker::declare, docker::construct);

    let _ = catalog;
}

/// A catalog holding every built-in plugin.
pub fn builtin_catalog() -> MonitorCatalog {
    let mut catalog = MonitorCatalog::new();
    register_builtin(&mut catalog);
    catalog
}
