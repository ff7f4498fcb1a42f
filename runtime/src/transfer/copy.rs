//! Image copy driver.

use std::collections::HashSet;

use futures::stream::{self, StreamExt, TryStreamExt};
use tagbag_core::config::{ImageSelection, TagbagConfig, DEFAULT_BLOB_CONCURRENCY};
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;

use super::{BlobInfo, ImageDestination, ImageSource};
use crate::oci::manifest::{select_platform, ImageBlobs, ParsedManifest};

/// Options for [`copy_image`].
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Which manifest list instances to copy
    pub selection: ImageSelection,
    /// Maximum blobs in flight
    pub blob_concurrency: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            selection: ImageSelection::System,
            blob_concurrency: DEFAULT_BLOB_CONCURRENCY,
        }
    }
}

impl From<&TagbagConfig> for CopyOptions {
    fn from(config: &TagbagConfig) -> Self {
        Self {
            selection: config.image_selection,
            blob_concurrency: config.blob_concurrency,
        }
    }
}

/// Summary of a finished copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Manifests written (list and instances)
    pub manifests: usize,
    /// Blobs whose bytes were transferred
    pub blobs_written: usize,
    /// Blobs the destination reported as reusable
    pub blobs_reused: usize,
    /// Bytes transferred
    pub bytes_written: u64,
}

enum BlobOutcome {
    Written(u64),
    Reused,
}

/// Copy an image from `src` to `dst` and commit the destination.
///
/// A failure leaves the destination uncommitted; images copied by earlier
/// calls are not touched.
pub async fn copy_image(
    src: &dyn ImageSource,
    dst: &dyn ImageDestination,
    options: &CopyOptions,
) -> Result<CopyReport> {
    let mut report = CopyReport::default();
    let (raw, mime) = src.get_manifest(None).await?;

    tracing::info!(
        source = %src.reference(),
        destination = %dst.reference(),
        mime = %mime,
        "Copying image"
    );

    match ParsedManifest::parse(&raw, &mime)? {
        ParsedManifest::Image(blobs) => {
            copy_blobs(src, dst, &blobs, options, &mut report).await?;
            dst.put_manifest(&raw, None).await?;
            report.manifests += 1;
        }
        ParsedManifest::List(entries) => match options.selection {
            ImageSelection::All => {
                for entry in &entries {
                    copy_instance(src, dst, &entry.digest, Some(&entry.digest), options, &mut report)
                        .await?;
                }
                dst.put_manifest(&raw, None).await?;
                report.manifests += 1;
            }
            ImageSelection::System => {
                let entry = select_platform(&entries).ok_or_else(|| {
                    TagbagError::OciImageError(format!(
                        "No linux/{} instance in {}",
                        std::env::consts::ARCH,
                        src.reference()
                    ))
                })?;
                copy_instance(src, dst, &entry.digest, None, options, &mut report).await?;
            }
        },
    }

    dst.commit().await?;

    tracing::info!(
        source = %src.reference(),
        written = report.blobs_written,
        reused = report.blobs_reused,
        bytes = report.bytes_written,
        "Image copied"
    );
    Ok(report)
}

/// Copy one manifest list child, storing its manifest under `store_as`.
async fn copy_instance(
    src: &dyn ImageSource,
    dst: &dyn ImageDestination,
    instance: &Digest,
    store_as: Option<&Digest>,
    options: &CopyOptions,
    report: &mut CopyReport,
) -> Result<()> {
    let (raw, mime) = src.get_manifest(Some(instance)).await?;
    let blobs = ParsedManifest::parse_image(&raw, &mime)?;
    copy_blobs(src, dst, &blobs, options, report).await?;
    dst.put_manifest(&raw, store_as).await?;
    report.manifests += 1;
    Ok(())
}

async fn copy_blobs(
    src: &dyn ImageSource,
    dst: &dyn ImageDestination,
    blobs: &ImageBlobs,
    options: &CopyOptions,
    report: &mut CopyReport,
) -> Result<()> {
    let config_digest = &blobs.config.digest;
    let mut unique = HashSet::new();
    let pending: Vec<(&BlobInfo, bool)> = blobs
        .all()
        .filter(|info| unique.insert(info.digest.clone()))
        .map(|info| (info, &info.digest == config_digest))
        .collect();

    let outcomes: Vec<BlobOutcome> = stream::iter(pending)
        .map(|(info, is_config)| copy_blob(src, dst, info, is_config))
        .buffer_unordered(options.blob_concurrency.max(1))
        .try_collect()
        .await?;

    for outcome in outcomes {
        match outcome {
            BlobOutcome::Written(bytes) => {
                report.blobs_written += 1;
                report.bytes_written += bytes;
            }
            BlobOutcome::Reused => report.blobs_reused += 1,
        }
    }
    Ok(())
}

async fn copy_blob(
    src: &dyn ImageSource,
    dst: &dyn ImageDestination,
    info: &BlobInfo,
    is_config: bool,
) -> Result<BlobOutcome> {
    if dst.try_reusing_blob(info).await?.is_some() {
        tracing::debug!(digest = %info.digest, "Reusing blob");
        return Ok(BlobOutcome::Reused);
    }

    let (stream, _size) = src.get_blob(info).await?;
    let written = dst.put_blob(stream, info, is_config).await?;
    tracing::debug!(digest = %written.digest, size = ?written.size, "Wrote blob");
    Ok(BlobOutcome::Written(written.size.unwrap_or(0)))
}
