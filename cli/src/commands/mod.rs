//! CLI command definitions and dispatch.

mod get;
mod images;
mod info;
mod load;
mod resolve;
mod rmi;
mod tag;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nixload_core::{ConfigLocations, NixloadConfig};
use nixload_runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// nixload: load container images straight from the Nix store.
#[derive(Parser)]
#[command(name = "nixload", version, about)]
pub struct Cli {
    /// Configuration file (default: <config-dir>/nixload/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Resolve an image name to its Nix store artifact
    Resolve(resolve::ResolveArgs),
    /// Resolve, import and tag an image
    Get(get::GetArgs),
    /// List stored images
    Images(images::ImagesArgs),
    /// Load an image archive or layout directory into the store
    Load(load::LoadArgs),
    /// Create a tag that refers to an existing image
    Tag(tag::TagArgs),
    /// Remove one or more stored images
    Rmi(rmi::RmiArgs),
    /// Show backend and store information
    Info(info::InfoArgs),
}

/// Load the configuration file named on the command line, or the default one.
pub(crate) fn load_config(path: Option<&PathBuf>) -> nixload_core::Result<NixloadConfig> {
    match path {
        Some(path) => NixloadConfig::load(path),
        None => NixloadConfig::load_default(),
    }
}

/// Open the image store and probe for a resolution strategy.
pub(crate) fn open_runtime(
    config: &NixloadConfig,
) -> Result<Runtime, Box<dyn std::error::Error>> {
    Ok(Runtime::from_config(config, &ConfigLocations::default())?)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(
    cli: Cli,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Resolve(args) => resolve::execute(args, &config, &cancel).await,
        Command::Get(args) => get::execute(args, &config, &cancel).await,
        Command::Images(args) => images::execute(args, &config).await,
        Command::Load(args) => load::execute(args, &config).await,
        Command::Tag(args) => tag::execute(args, &config).await,
        Command::Rmi(args) => rmi::execute(args, &config).await,
        Command::Info(args) => info::execute(args, &config).await,
    }
}
