//! Read side of a store image.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;

use super::dir::ImageDirectory;
use super::resolve::find_blob;
use super::seen::SeenIndex;
use crate::transfer::{BlobInfo, BlobReader, ImageSource};

/// Source reading one image of a store.
///
/// Blobs deduplicated into other images are resolved through the store's
/// seen index, then by scanning the store.
pub struct StoreSource {
    image: String,
    dir: ImageDirectory,
    root: PathBuf,
    seen: Arc<SeenIndex>,
}

impl StoreSource {
    pub(crate) fn new(image: String, dir: ImageDirectory, root: PathBuf, seen: Arc<SeenIndex>) -> Self {
        Self {
            image,
            dir,
            root,
            seen,
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

#[async_trait]
impl ImageSource for StoreSource {
    fn reference(&self) -> String {
        format!("store:{}", self.dir.path().display())
    }

    async fn get_manifest(&self, instance: Option<&Digest>) -> Result<(Vec<u8>, String)> {
        self.dir.read_manifest(instance)
    }

    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobReader, Option<u64>)> {
        match self.dir.open_blob(&info.digest).await {
            Ok((file, size)) => return Ok((Box::new(file), Some(size))),
            Err(e) => {
                let err = TagbagError::from(e);
                if !err.is_not_found() {
                    return Err(TagbagError::storage(self.dir.blob_path(&info.digest), err));
                }
            }
        }

        let path = find_blob(&self.root, &self.seen, &info.digest)?;
        tracing::debug!(image = %self.image, digest = %info.digest, path = %path.display(), "Resolved blob from another image");

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| TagbagError::storage(&path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| TagbagError::storage(&path, e))?
            .len();
        Ok((Box::new(file), Some(size)))
    }
}
