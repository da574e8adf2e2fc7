//! helmsync - reconciles HelmRelease records into Helm releases
//!
//! `helmsync run` starts the controller against the current cluster;
//! `helmsync crd` prints the CustomResourceDefinition to apply first.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use helmsync::cli::{self, ConfigSubcommand};
use helmsync::config::ConfigLoader;
use helmsync::controller;

/// helmsync - Kubernetes controller for Helm releases
#[derive(Parser, Debug)]
#[command(name = "helmsync", version)]
#[command(about = "Reconciles HelmRelease records into Helm releases", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Main commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller (default)
    Run,
    /// Print the HelmRelease CRD as YAML
    Crd,
    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::Config { subcommand } => cli::handle_config_command(subcommand),
        Command::Crd => {
            print!("{}", cli::crd_yaml()?);
            Ok(())
        }
        Command::Run => run(args.debug, args.log_file).await,
    }
}

async fn run(debug: bool, log_file: Option<PathBuf>) -> Result<()> {
    let config = ConfigLoader::validate()?;
    cli::init_logging(debug, &config.logger.level, log_file.as_deref())?;
    tracing::debug!(?config, "Configuration loaded");

    let client = helmsync::kube::create_client()
        .await
        .context("Failed to connect to Kubernetes")?;

    controller::build_controller(client, &config)?.await;
    tracing::info!("Controller stopped");
    Ok(())
}
