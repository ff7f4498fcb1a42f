//! `tagbag images` command.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use clap::Args;
use tagbag_core::digest::is_digest_name;
use tagbag_core::TagbagConfig;
use tagbag_runtime::{tgz, Storage};

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Tarball to inspect
    #[arg(long, conflicts_with = "root", required_unless_present = "root")]
    pub source: Option<PathBuf>,

    /// Unpacked store directory to inspect
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Only show image names (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: ImagesArgs, config: &TagbagConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Keeps the unpacked tarball alive until listing is done.
    let mut _work = None;
    let root = match (&args.source, &args.root) {
        (_, Some(root)) => root.clone(),
        (Some(source), None) => {
            let work = super::work_dir(config, None)?;
            tgz::uncompress(source, work.path())?;
            let root = work.path().to_path_buf();
            _work = Some(work);
            root
        }
        (None, None) => return Err("one of --source or --root is required".into()),
    };

    let storage = Storage::new(root);
    let images = storage.images()?;

    if args.quiet {
        for image in &images {
            println!("{image}");
        }
        return Ok(());
    }

    let files = storage.files()?;
    let mut table = output::new_table(&["IMAGE", "BLOBS", "SIZE"]);
    for image in &images {
        let (blobs, size) = blob_usage(&files, Path::new(image));
        table.add_row(vec![
            image.clone(),
            blobs.to_string(),
            output::format_bytes(size),
        ]);
    }

    println!("{table}");
    Ok(())
}

/// Count and total size of the blobs stored in an image's own directory.
///
/// Blobs shared with images written earlier live in those images'
/// directories and are not counted again.
fn blob_usage(files: &BTreeMap<PathBuf, Metadata>, image: &Path) -> (usize, u64) {
    files
        .iter()
        .filter(|(path, _)| path.parent() == Some(image))
        .filter(|(path, _)| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_digest_name)
        })
        .fold((0, 0), |(count, size), (_, metadata)| {
            (count + 1, size + metadata.len())
        })
}
