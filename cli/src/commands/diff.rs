//! `tagbag diff` command.
//!
//! Produces an overlay tarball: the target tarball minus every file whose
//! name also appears in the source tarball. Pushing the source with the
//! overlay applied pushes the target.

use std::path::PathBuf;

use clap::Args;
use tagbag_core::{MatchPolicy, TagbagConfig};
use tagbag_runtime::diff_tarballs;

#[derive(Args)]
pub struct DiffArgs {
    /// Source tarball
    #[arg(long)]
    pub source: PathBuf,

    /// Target tarball
    #[arg(long)]
    pub target: PathBuf,

    /// Destination tarball
    #[arg(short, long, default_value = "./overlay.tgz")]
    pub destination: PathBuf,

    /// Temporary directory to use
    #[arg(short, long)]
    pub temp: Option<PathBuf>,

    /// Also remove non-blob files (manifests, markers) whose names match
    #[arg(long)]
    pub any_name: bool,
}

pub async fn execute(args: DiffArgs, config: &TagbagConfig) -> Result<(), Box<dyn std::error::Error>> {
    let work = super::work_dir(config, args.temp.as_deref())?;
    let policy = if args.any_name {
        MatchPolicy::AnyName
    } else {
        config.match_policy
    };

    println!("Calculating diff");
    let report = diff_tarballs(
        &args.source,
        &args.target,
        &args.destination,
        work.path(),
        policy,
    )?;

    println!(
        "Writing file {} ({} files removed, {} directories pruned)",
        args.destination.display(),
        report.removed.len(),
        report.pruned_dirs
    );
    Ok(())
}
