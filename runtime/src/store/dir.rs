//! Per-image directory layout.
//!
//! ```text
//! <image dir>/
//! ├── version                 (layout marker)
//! ├── manifest.json           (top-level manifest or manifest list)
//! ├── <hex>.manifest.json     (manifest list instances)
//! └── <hex>                   (blobs owned by this image)
//! ```

use std::path::{Path, PathBuf};

use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;

use crate::oci::manifest::guess_mime;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const VERSION_FILE: &str = "version";
const VERSION_CONTENT: &str = "Directory Transport Version: 1.1\n";

/// One image subdirectory of a store.
#[derive(Debug, Clone)]
pub struct ImageDirectory {
    path: PathBuf,
}

impl ImageDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blob files are named by hex digest only.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.path.join(digest.hex())
    }

    pub fn manifest_path(&self, instance: Option<&Digest>) -> PathBuf {
        match instance {
            Some(digest) => self.path.join(format!("{}.{}", digest.hex(), MANIFEST_FILE)),
            None => self.path.join(MANIFEST_FILE),
        }
    }

    /// Size of a blob owned by this directory, if present.
    pub fn blob_size(&self, digest: &Digest) -> Option<u64> {
        std::fs::metadata(self.blob_path(digest))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    pub fn read_manifest(&self, instance: Option<&Digest>) -> Result<(Vec<u8>, String)> {
        let path = self.manifest_path(instance);
        let raw = std::fs::read(&path).map_err(|e| {
            TagbagError::OciImageError(format!(
                "Failed to read manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        let mime = guess_mime(&raw);
        Ok((raw, mime))
    }

    pub fn write_manifest(&self, raw: &[u8], instance: Option<&Digest>) -> Result<()> {
        let path = self.manifest_path(instance);
        std::fs::write(&path, raw)
            .map_err(|e| TagbagError::storage(&path, format!("Failed to write manifest: {}", e)))
    }

    pub fn write_version(&self) -> Result<()> {
        let path = self.path.join(VERSION_FILE);
        std::fs::write(&path, VERSION_CONTENT)
            .map_err(|e| TagbagError::storage(&path, format!("Failed to write version: {}", e)))
    }

    /// Open a blob owned by this directory.
    pub async fn open_blob(&self, digest: &Digest) -> std::io::Result<(tokio::fs::File, u64)> {
        let file = tokio::fs::File::open(self.blob_path(digest)).await?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }
}
