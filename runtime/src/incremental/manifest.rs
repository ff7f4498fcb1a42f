//! Blob digests referenced by an image.

use std::collections::HashSet;

use futures::future::try_join_all;
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;

use crate::oci::manifest::{ImageBlobs, ParsedManifest};
use crate::transfer::ImageSource;

/// Every config and layer digest referenced by `source`.
///
/// A manifest list contributes the union over all of its instances, which
/// are fetched concurrently. Any fetch or parse failure fails the whole
/// call with `ManifestFetchFailed`; no partial set is returned.
pub async fn collect_digests(source: &dyn ImageSource) -> Result<HashSet<Digest>> {
    let failed = |e: TagbagError| TagbagError::ManifestFetchFailed {
        reference: source.reference(),
        message: e.to_string(),
    };

    let (raw, mime) = source.get_manifest(None).await.map_err(failed)?;
    let images = match ParsedManifest::parse(&raw, &mime).map_err(failed)? {
        ParsedManifest::Image(blobs) => vec![blobs],
        ParsedManifest::List(entries) => {
            tracing::debug!(
                source = %source.reference(),
                instances = entries.len(),
                "Fetching manifest list instances"
            );
            try_join_all(entries.iter().map(|entry| fetch_instance(source, &entry.digest)))
                .await
                .map_err(failed)?
        }
    };

    let digests: HashSet<Digest> = images
        .iter()
        .flat_map(|blobs| blobs.all().map(|info| info.digest.clone()))
        .collect();

    tracing::debug!(source = %source.reference(), digests = digests.len(), "Collected base digests");
    Ok(digests)
}

async fn fetch_instance(source: &dyn ImageSource, digest: &Digest) -> Result<ImageBlobs> {
    let (raw, mime) = source.get_manifest(Some(digest)).await?;
    ParsedManifest::parse_image(&raw, &mime)
}
