//! CLI command definitions and dispatch.

mod diff;
mod images;
mod incremental;
mod pull;
mod push;
mod version;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tagbag_core::config::default_config_path;
use tagbag_core::{TagbagConfig, TagbagError};

/// Tagbag - deduplicated container image tarballs.
#[derive(Parser)]
#[command(name = "tagbag", version, about)]
pub struct Cli {
    /// Configuration file (defaults to ~/.tagbag/config.yaml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Pull multiple images into a deduplicated tarball
    Pull(pull::PullArgs),
    /// Push every image of a deduplicated tarball to a registry
    Push(push::PushArgs),
    /// Generate an overlay tarball holding what target adds to source
    Diff(diff::DiffArgs),
    /// List the images inside a tarball or store directory
    Images(images::ImagesArgs),
    /// Pull or push the difference between two image versions
    #[command(subcommand)]
    Incremental(incremental::IncrementalCommand),
    /// Show version information
    Version(version::VersionArgs),
}

/// Load the configuration, reporting whether it came from a file.
///
/// An explicit path must exist; the default path is used only if present.
pub fn load_config(path: Option<&Path>) -> Result<(TagbagConfig, bool), TagbagError> {
    if let Some(path) = path {
        return Ok((TagbagConfig::load(path)?, true));
    }
    match default_config_path() {
        Some(path) if path.is_file() => Ok((TagbagConfig::load(&path)?, true)),
        _ => Ok((TagbagConfig::default(), false)),
    }
}

/// Scratch directory below the configured temp dir, or `--temp` when
/// given. Removed when dropped.
pub(crate) fn work_dir(
    config: &TagbagConfig,
    temp: Option<&Path>,
) -> Result<tempfile::TempDir, TagbagError> {
    let base = temp.unwrap_or(&config.temp_dir);
    std::fs::create_dir_all(base).map_err(|e| {
        TagbagError::storage(base, format!("Failed to create temp dir: {}", e))
    })?;
    tempfile::Builder::new()
        .prefix("tagbag-")
        .tempdir_in(base)
        .map_err(|e| TagbagError::storage(base, e))
}

/// Dispatch a parsed CLI to the appropriate command handler.
///
/// Interrupting with Ctrl-C drops the running command and reports it as
/// cancelled.
pub async fn dispatch(cli: Cli, config: TagbagConfig) -> Result<(), Box<dyn std::error::Error>> {
    tokio::select! {
        result = run(cli.command, config) => result,
        _ = tokio::signal::ctrl_c() => {
            Err(TagbagError::Cancelled("interrupted".to_string()).into())
        }
    }
}

async fn run(command: Command, config: TagbagConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Pull(args) => pull::execute(args, &config).await,
        Command::Push(args) => push::execute(args, &config).await,
        Command::Diff(args) => diff::execute(args, &config).await,
        Command::Images(args) => images::execute(args, &config).await,
        Command::Incremental(command) => incremental::execute(command, &config).await,
        Command::Version(args) => version::execute(args).await,
    }
}
