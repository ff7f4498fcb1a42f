//! `tagbag push` command.

use std::path::PathBuf;

use clap::Args;
use tagbag_core::{ImageSelection, TagbagConfig};
use tagbag_runtime::{copy_image, tgz, CopyOptions, ImageReference, RegistryDestination, Storage};

use crate::output;

#[derive(Args)]
pub struct PushArgs {
    /// Source tarball
    #[arg(short, long)]
    pub source: PathBuf,

    /// Destination registry address (e.g., "registry.local:5000/mirror")
    #[arg(short, long)]
    pub destination: String,

    /// Overlay tarballs unpacked over the source, in order
    #[arg(short, long = "overlay")]
    pub overlays: Vec<PathBuf>,

    /// Temporary directory to use
    #[arg(short, long)]
    pub temp: Option<PathBuf>,
}

/// Registry reference an image of the tarball is pushed to: the last path
/// component of its store name below `destination`.
fn target_reference(destination: &str, image: &str) -> String {
    let repository = image.rsplit('/').next().unwrap_or(image);
    format!("{}/{}", destination.trim_end_matches('/'), repository)
}

pub async fn execute(args: PushArgs, config: &TagbagConfig) -> Result<(), Box<dyn std::error::Error>> {
    let work = super::work_dir(config, args.temp.as_deref())?;
    tgz::uncompress(&args.source, work.path())?;
    for overlay in &args.overlays {
        tgz::uncompress(overlay, work.path())?;
    }

    let storage = Storage::new(work.path()).with_verify_digests(config.verify_digests);
    let options = CopyOptions {
        selection: ImageSelection::All,
        ..CopyOptions::from(config)
    };

    let images = storage.images()?;
    if images.is_empty() {
        println!("No images in {}", args.source.display());
        return Ok(());
    }

    for image in images {
        storage.select_image(&image)?;
        let source = storage.new_image_source()?;
        let target = ImageReference::parse(&target_reference(&args.destination, &image))?;

        println!("Pushing {} to {}", image, target);
        let destination = RegistryDestination::new(target);
        let report = copy_image(&source, &destination, &options).await?;
        println!("  {}", output::copy_summary(&report));
    }
    Ok(())
}
