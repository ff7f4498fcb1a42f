//! Write side of a store image.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;

use super::dir::ImageDirectory;
use super::seen::SeenIndex;
use super::Committer;
use crate::fs::write_blob_file;
use crate::transfer::{BlobInfo, BlobReader, ImageDestination};

/// Marks a store as having an open write session.
///
/// The holder is cleared when the guard is dropped, so an abandoned
/// destination never blocks later image selection.
pub(crate) struct WriteSlot {
    holder: Arc<Mutex<Option<String>>>,
}

impl WriteSlot {
    pub(crate) fn acquire(holder: &Arc<Mutex<Option<String>>>, image: &str) -> Result<Self> {
        let mut current = holder.lock();
        if let Some(active) = current.as_ref() {
            return Err(TagbagError::SessionActive(active.clone()));
        }
        *current = Some(image.to_string());
        Ok(Self {
            holder: Arc::clone(holder),
        })
    }
}

impl Drop for WriteSlot {
    fn drop(&mut self) {
        *self.holder.lock() = None;
    }
}

/// Destination writing into one image directory of a store.
///
/// Blobs already known to the store, in any image, are reported reusable
/// and never rewritten.
pub struct StoreDestination {
    image: String,
    dir: ImageDirectory,
    seen: Arc<SeenIndex>,
    verify: bool,
    slot: Mutex<Option<WriteSlot>>,
    committer: Option<Arc<dyn Committer>>,
}

impl StoreDestination {
    pub(crate) fn new(
        image: String,
        dir: ImageDirectory,
        seen: Arc<SeenIndex>,
        verify: bool,
        slot: WriteSlot,
        committer: Option<Arc<dyn Committer>>,
    ) -> Self {
        Self {
            image,
            dir,
            seen,
            verify,
            slot: Mutex::new(Some(slot)),
            committer,
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

#[async_trait]
impl ImageDestination for StoreDestination {
    fn reference(&self) -> String {
        format!("store:{}", self.dir.path().display())
    }

    async fn try_reusing_blob(&self, info: &BlobInfo) -> Result<Option<BlobInfo>> {
        if let Some(entry) = self.seen.get(&info.digest) {
            tracing::debug!(digest = %info.digest, path = %entry.path.display(), "Blob already in store");
            return Ok(Some(entry.info));
        }

        match self.dir.blob_size(&info.digest) {
            Some(size) => {
                let found = BlobInfo {
                    digest: info.digest.clone(),
                    size: Some(size),
                    media_type: info.media_type.clone(),
                };
                self.seen
                    .add(found.clone(), self.dir.blob_path(&info.digest));
                Ok(Some(found))
            }
            None => Ok(None),
        }
    }

    async fn put_blob(
        &self,
        stream: BlobReader,
        info: &BlobInfo,
        _is_config: bool,
    ) -> Result<BlobInfo> {
        let written = write_blob_file(self.dir.path(), stream, info, self.verify).await?;
        self.seen
            .add(written.clone(), self.dir.blob_path(&written.digest));

        tracing::debug!(
            image = %self.image,
            digest = %written.digest,
            size = written.size.unwrap_or(0),
            "Stored blob"
        );
        Ok(written)
    }

    async fn put_manifest(&self, manifest: &[u8], instance: Option<&Digest>) -> Result<()> {
        self.dir.write_manifest(manifest, instance)
    }

    async fn commit(&self) -> Result<()> {
        self.dir.write_version()?;
        drop(self.slot.lock().take());

        if let Some(committer) = &self.committer {
            committer
                .commit(&format!("Store image {}", self.image))
                .map_err(|e| TagbagError::CommitError(format!("{}: {}", self.image, e)))?;
        }

        tracing::info!(image = %self.image, "Committed image");
        Ok(())
    }
}
