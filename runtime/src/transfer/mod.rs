//! Image transfer capabilities.
//!
//! Every place images move between (the deduplicating store, OCI layouts
//! and archives, registries, the incremental writer) is expressed as an
//! [`ImageSource`] and/or an [`ImageDestination`]. [`copy_image`] drives the
//! per-blob protocol between a pair of them:
//!
//! ```text
//!  for each blob in manifest order
//!      dst.try_reusing_blob ──► reusable? ── yes ──► skip bytes
//!                                   │
//!                                   no
//!                                   ▼
//!      src.get_blob ──────────► dst.put_blob
//!  dst.put_manifest
//!  dst.commit
//! ```

mod copy;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tagbag_core::{Digest, Result};
use tokio::io::AsyncRead;

pub use copy::{copy_image, CopyOptions, CopyReport};
pub use memory::{MemoryImageDestination, MemoryImageSource};

/// Readable blob content.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Identity and metadata of a blob as seen by the transfer protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Content digest
    pub digest: Digest,
    /// Size in bytes, when known
    pub size: Option<u64>,
    /// Media type from the referencing manifest
    pub media_type: Option<String>,
}

impl BlobInfo {
    pub fn new(digest: Digest) -> Self {
        Self {
            digest,
            size: None,
            media_type: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Read side of an image.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Human readable name used in logs and errors.
    fn reference(&self) -> String;

    /// Raw manifest bytes and MIME type. `None` is the top-level manifest,
    /// `Some(digest)` an instance of a manifest list.
    async fn get_manifest(&self, instance: Option<&Digest>) -> Result<(Vec<u8>, String)>;

    /// Open a blob for reading, returning the stream and its size if known.
    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobReader, Option<u64>)>;
}

/// Write side of an image.
#[async_trait]
pub trait ImageDestination: Send + Sync {
    /// Human readable name used in logs and errors.
    fn reference(&self) -> String;

    /// Whether the blob's bytes can be skipped. `Some` carries the info of
    /// the blob already available to this destination.
    async fn try_reusing_blob(&self, info: &BlobInfo) -> Result<Option<BlobInfo>>;

    /// Store blob content and return what was written.
    async fn put_blob(&self, stream: BlobReader, info: &BlobInfo, is_config: bool)
        -> Result<BlobInfo>;

    /// Store a manifest. `instance` is set for manifest list children.
    async fn put_manifest(&self, manifest: &[u8], instance: Option<&Digest>) -> Result<()>;

    /// Finish the write session.
    async fn commit(&self) -> Result<()>;
}
