//! `tagbag incremental` commands.
//!
//! `pull` writes an archive holding only what the final image adds on top
//! of the base image. `push` replays such an archive into a destination
//! that already holds the base image.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tagbag_core::{TagbagConfig, TagbagError};
use tagbag_runtime::Incremental;

use crate::output;

#[derive(Subcommand)]
pub enum IncrementalCommand {
    /// Write the difference between two images into an archive
    Pull(IncrementalPullArgs),
    /// Push an incremental archive to a destination holding the base image
    Push(IncrementalPushArgs),
}

#[derive(Args)]
pub struct IncrementalPullArgs {
    /// Base image already present at the destination (e.g., "docker://app:v1")
    #[arg(long)]
    pub base: String,

    /// Final image to transfer (e.g., "docker://app:v2")
    #[arg(long = "final")]
    pub fin: String,

    /// Destination archive
    #[arg(short, long, default_value = "./incremental.tar")]
    pub destination: PathBuf,

    /// Temporary directory to use
    #[arg(short, long)]
    pub temp: Option<PathBuf>,
}

#[derive(Args)]
pub struct IncrementalPushArgs {
    /// Incremental archive written by `incremental pull`
    #[arg(short, long)]
    pub source: PathBuf,

    /// Destination image (e.g., "docker://registry.local/app:v2")
    #[arg(short, long)]
    pub destination: String,
}

pub async fn execute(
    command: IncrementalCommand,
    config: &TagbagConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        IncrementalCommand::Pull(args) => pull(args, config).await,
        IncrementalCommand::Push(args) => push(args, config).await,
    }
}

async fn pull(args: IncrementalPullArgs, config: &TagbagConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut incremental = Incremental::from_config(config);
    if let Some(temp) = args.temp {
        incremental = incremental.with_temp_dir(temp);
    }

    println!("Pulling difference between {} and {}", args.base, args.fin);
    let archive = incremental.pull_names(&args.base, &args.fin).await?;

    std::fs::copy(archive.path(), &args.destination).map_err(|e| {
        TagbagError::storage(&args.destination, format!("Failed to write archive: {}", e))
    })?;
    println!("Writing file {}", args.destination.display());
    Ok(())
}

async fn push(args: IncrementalPushArgs, config: &TagbagConfig) -> Result<(), Box<dyn std::error::Error>> {
    let incremental = Incremental::from_config(config);

    println!("Pushing {} to {}", args.source.display(), args.destination);
    let report = incremental
        .push_name(&args.source, &args.destination)
        .await?;
    println!("  {}", output::copy_summary(&report));
    Ok(())
}
