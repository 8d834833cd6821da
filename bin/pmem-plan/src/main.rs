//! Offline planner for persistent memory allocations and namespaces.
//!
//! Every command runs against an inventory snapshot rather than live hardware, so plans can be inspected (and
//! namespace operations rehearsed) before anything is changed on a real system.

#![deny(warnings)]
#![deny(missing_docs)]

use std::path::Path;

use clap::Parser as _;
use pmem_config::ConfigurationLoader;
use pmem_error::{ErrorContext as _, GenericError};
use pmem_planner::PlannerConfiguration;
use tracing::{debug, error};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod cli;
use self::cli::Cli;

mod commands;
use self::commands::Planner;

mod snapshot;

fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), GenericError> {
    let config = load_configuration(cli.config.as_deref())?;
    debug!(?config, "Loaded planner configuration.");

    let inventory = snapshot::load(&cli.snapshot)?;
    let planner = Planner::new(config, inventory);

    let report = planner.execute(&cli.command)?;
    print!("{}", report);

    Ok(())
}

fn load_configuration(config_path: Option<&Path>) -> Result<PlannerConfiguration, GenericError> {
    let mut loader = ConfigurationLoader::default();
    if let Some(path) = config_path {
        loader = loader
            .from_yaml(path)
            .with_error_context(|| format!("Failed to load configuration file '{}'.", path.display()))?;
    }

    loader
        .from_environment("pmem")
        .error_context("Failed to read configuration from the environment.")?
        .into_typed()
        .error_context("Invalid planner configuration.")
}
