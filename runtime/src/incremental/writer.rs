//! Destination wrapper that elides base image blobs.

use std::collections::HashSet;

use async_trait::async_trait;
use tagbag_core::error::Result;
use tagbag_core::Digest;

use super::manifest::collect_digests;
use crate::transfer::{BlobInfo, BlobReader, ImageDestination, ImageSource};

/// Wraps a destination so that every blob of a base image is reported
/// reusable, leaving only the delta to be written.
pub struct IncrementalWriter<D> {
    inner: D,
    present: HashSet<Digest>,
}

impl<D: ImageDestination> IncrementalWriter<D> {
    /// Collect the digests of `base` and wrap `inner`.
    pub async fn new(base: &dyn ImageSource, inner: D) -> Result<Self> {
        let present = collect_digests(base).await?;
        tracing::info!(
            base = %base.reference(),
            destination = %inner.reference(),
            present = present.len(),
            "Created incremental writer"
        );
        Ok(Self::with_digests(present, inner))
    }

    pub fn with_digests(present: HashSet<Digest>, inner: D) -> Self {
        Self { inner, present }
    }

    /// Digests that are never written.
    pub fn present(&self) -> &HashSet<Digest> {
        &self.present
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

#[async_trait]
impl<D: ImageDestination> ImageDestination for IncrementalWriter<D> {
    fn reference(&self) -> String {
        self.inner.reference()
    }

    async fn try_reusing_blob(&self, info: &BlobInfo) -> Result<Option<BlobInfo>> {
        if self.present.contains(&info.digest) {
            tracing::debug!(digest = %info.digest, "Blob present in base image");
            return Ok(Some(info.clone()));
        }
        self.inner.try_reusing_blob(info).await
    }

    async fn put_blob(
        &self,
        stream: BlobReader,
        info: &BlobInfo,
        is_config: bool,
    ) -> Result<BlobInfo> {
        self.inner.put_blob(stream, info, is_config).await
    }

    async fn put_manifest(&self, manifest: &[u8], instance: Option<&Digest>) -> Result<()> {
        self.inner.put_manifest(manifest, instance).await
    }

    async fn commit(&self) -> Result<()> {
        self.inner.commit().await
    }
}
