//! # samplewatch
//!
//! Command-line runner for samplewatch monitor plugins.
//!
//! The agent reads a TOML configuration file listing monitor instances,
//! builds each one from the built-in plugin catalog, and runs them until
//! interrupted.
//!
//! - **[`agent`]**: the agent configuration file and building the monitor set
//! - **[`report`]**: `list` and `describe` output

pub mod agent;
pub mod report;

pub use agent::{build_runtimes, instance_name, AgentConfig};
