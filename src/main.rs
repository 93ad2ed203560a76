use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use samplewatch::agent::{build_runtimes, AgentConfig};
use samplewatch::report;
use samplewatch_sdk::{MetadataRegistry, MonitorRuntime};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long each monitor gets to finish its current sample on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "samplewatch")]
#[command(about = "Runs monitor plugins that periodically sample system state")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitors listed in an agent configuration file until Ctrl-C
    Run {
        /// Path to the agent configuration file
        #[arg(short, long, default_value = "agent.toml")]
        config: PathBuf,

        /// Directory for monitor output files (overrides `log_dir` in the config)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// List the available monitor modules
    List,

    /// Print the reference page for a monitor module
    Describe {
        /// Module identifier, e.g. samplewatch.builtin.loadavg
        module: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let catalog = samplewatch_adapters::builtin_catalog();
    let registry = MetadataRegistry::global();

    match args.command {
        Command::Run { config, log_dir } => {
            let agent = AgentConfig::load(&config)?;
            let runtimes = build_runtimes(&agent, &catalog, registry, log_dir.as_deref())?;
            run(&runtimes)
        }
        Command::List => {
            print!("{}", report::module_list(&catalog, registry));
            Ok(())
        }
        Command::Describe { module } => match report::describe(&catalog, registry, &module) {
            Some(page) => {
                print!("{}", page);
                Ok(())
            }
            None => bail!("Unknown monitor module: {}", module),
        },
    }
}

/// Start every runtime, wait for Ctrl-C, then shut them all down.
fn run(runtimes: &[MonitorRuntime]) -> Result<()> {
    for (started, runtime) in runtimes.iter().enumerate() {
        if let Err(e) = runtime.start() {
            error!(monitor = %runtime.name(), error = %e, "failed to start monitor");
            shutdown(&runtimes[..started]);
            return Err(e).context("Failed to start monitors");
        }
    }
    info!(count = runtimes.len(), "all monitors started; press Ctrl-C to stop");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl-C")?;

    info!("shutting down");
    shutdown(runtimes);

    for runtime in runtimes {
        println!(
            "{}: reported_lines={} errors={}",
            runtime.name(),
            runtime.reported_lines(),
            runtime.errors()
        );
    }
    Ok(())
}

fn shutdown(runtimes: &[MonitorRuntime]) {
    for runtime in runtimes {
        runtime.stop();
    }
    for runtime in runtimes {
        if !runtime.shutdown(Some(SHUTDOWN_TIMEOUT)) {
            error!(monitor = %runtime.name(), "monitor did not stop in time");
        }
    }
}
