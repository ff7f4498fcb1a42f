//! Incremental image transfer.
//!
//! Pulling produces an `oci-archive` holding only the blobs a final image
//! adds on top of a base image. Pushing replays such an archive into a
//! destination that already holds the base image's blobs.
//!
//! ```text
//!  base ──collect_digests──► present set
//!                                │
//!  final ──copy_image──► IncrementalWriter ──► oci-archive (delta)
//! ```

mod manifest;
mod writer;

use std::fs::File;
use std::path::{Path, PathBuf};

use tagbag_core::error::{Result, TagbagError};
use tagbag_core::TagbagConfig;
use tempfile::NamedTempFile;

use crate::oci::{ImageLocation, OciLayoutDestination, OciLayoutSource};
use crate::transfer::{copy_image, CopyOptions, CopyReport, ImageDestination, ImageSource};

pub use manifest::collect_digests;
pub use writer::IncrementalWriter;

/// Pulls and pushes incremental differences between images.
#[derive(Debug, Clone)]
pub struct Incremental {
    temp_dir: PathBuf,
    options: CopyOptions,
}

impl Default for Incremental {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            options: CopyOptions::default(),
        }
    }
}

impl Incremental {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TagbagConfig) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            options: CopyOptions::from(config),
        }
    }

    /// Directory holding archives and unpacked layouts.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Copy `fin` into a new archive, skipping every blob of `base`.
    ///
    /// The archive is removed from disk when the returned file is dropped.
    pub async fn pull(
        &self,
        base: &dyn ImageSource,
        fin: &dyn ImageSource,
    ) -> Result<NamedTempFile> {
        std::fs::create_dir_all(&self.temp_dir).map_err(|e| {
            TagbagError::storage(&self.temp_dir, format!("Failed to create temp dir: {}", e))
        })?;
        let archive = tempfile::Builder::new()
            .prefix("incremental-")
            .suffix(".tar")
            .tempfile_in(&self.temp_dir)
            .map_err(|e| TagbagError::storage(&self.temp_dir, e))?
            .into_temp_path();

        let destination =
            OciLayoutDestination::archive(archive.to_path_buf(), None, &self.temp_dir)?;
        let writer = IncrementalWriter::new(base, destination).await?;
        let report = copy_image(fin, &writer, &self.options).await?;

        tracing::info!(
            base = %base.reference(),
            fin = %fin.reference(),
            written = report.blobs_written,
            elided = report.blobs_reused,
            archive = %archive.display(),
            "Pulled incremental difference"
        );

        // The archive was replaced on commit; hand out a handle to the new file.
        let file = File::open(&archive).map_err(|e| TagbagError::storage(&archive, e))?;
        Ok(NamedTempFile::from_parts(file, archive))
    }

    /// Pull the difference between two transport-qualified image names.
    pub async fn pull_names(&self, base: &str, fin: &str) -> Result<NamedTempFile> {
        let base = ImageLocation::parse(base)?.source(&self.temp_dir)?;
        let fin = ImageLocation::parse(fin)?.source(&self.temp_dir)?;
        self.pull(&*base, &*fin).await
    }

    /// Replay an incremental archive into `destination`.
    ///
    /// Fails with a missing-blob error when the destination does not hold
    /// a blob the archive elided.
    pub async fn push(
        &self,
        archive: &Path,
        destination: &dyn ImageDestination,
    ) -> Result<CopyReport> {
        let source = OciLayoutSource::from_archive(archive, None, &self.temp_dir)?;
        let report = copy_image(&source, destination, &self.options).await?;

        tracing::info!(
            archive = %archive.display(),
            destination = %destination.reference(),
            written = report.blobs_written,
            "Pushed incremental difference"
        );
        Ok(report)
    }

    /// Push an incremental archive to a transport-qualified image name.
    pub async fn push_name(&self, archive: &Path, destination: &str) -> Result<CopyReport> {
        let destination = ImageLocation::parse(destination)?.destination(&self.temp_dir)?;
        self.push(archive, &*destination).await
    }
}
