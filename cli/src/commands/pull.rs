//! `tagbag pull` command.

use std::path::PathBuf;

use clap::Args;
use tagbag_core::{ImageSelection, TagbagConfig};
use tagbag_runtime::{copy_image, tgz, CopyOptions, ImageReference, RegistrySource, Storage};

use crate::output;

#[derive(Args)]
pub struct PullArgs {
    /// Images to pull into the tarball (e.g., "alpine:3.19", "ghcr.io/org/app:v1")
    #[arg(short, long = "image", required = true)]
    pub images: Vec<String>,

    /// Temporary directory to use
    #[arg(short, long)]
    pub temp: Option<PathBuf>,

    /// Destination tarball
    #[arg(short, long, default_value = "./tagbag.tgz")]
    pub destination: PathBuf,

    /// Pull every instance of manifest lists
    #[arg(long)]
    pub all: bool,
}

pub async fn execute(args: PullArgs, config: &TagbagConfig) -> Result<(), Box<dyn std::error::Error>> {
    let work = super::work_dir(config, args.temp.as_deref())?;
    let storage = Storage::new(work.path()).with_verify_digests(config.verify_digests);

    let mut options = CopyOptions::from(config);
    if args.all {
        options.selection = ImageSelection::All;
    }

    for image in &args.images {
        let reference = ImageReference::parse(image)?;
        storage.select_image(&reference.store_name())?;
        let destination = storage.new_image_destination()?;

        println!("Pulling {}", reference);
        let source = RegistrySource::new(reference);
        let report = copy_image(&source, &destination, &options).await?;
        println!("  {}", output::copy_summary(&report));
    }

    println!("Writing file {}", args.destination.display());
    tgz::compress(work.path(), &args.destination)?;
    Ok(())
}
