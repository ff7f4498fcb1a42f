//! In-memory image source and destination.
//!
//! Stand-ins for registries and archives when exercising the store, the
//! incremental writer or the copy driver without I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tagbag_core::error::{Result, TagbagError};
use tagbag_core::Digest;
use tokio::io::AsyncReadExt;

use super::{BlobInfo, BlobReader, ImageDestination, ImageSource};
use crate::oci::manifest::guess_mime;

/// Image source backed by maps.
#[derive(Debug, Default)]
pub struct MemoryImageSource {
    name: String,
    manifests: HashMap<Option<Digest>, (Vec<u8>, String)>,
    blobs: HashMap<Digest, Vec<u8>>,
    blob_reads: AtomicUsize,
}

impl MemoryImageSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a blob and return its digest.
    pub fn add_blob(&mut self, data: &[u8]) -> Digest {
        let digest = Digest::from_bytes(data);
        self.blobs.insert(digest.clone(), data.to_vec());
        digest
    }

    /// Set the top-level manifest.
    pub fn set_manifest(&mut self, raw: Vec<u8>) {
        let mime = guess_mime(&raw);
        self.manifests.insert(None, (raw, mime));
    }

    /// Add a manifest list instance and return its digest.
    pub fn add_instance(&mut self, raw: Vec<u8>) -> Digest {
        let digest = Digest::from_bytes(&raw);
        let mime = guess_mime(&raw);
        self.manifests.insert(Some(digest.clone()), (raw, mime));
        digest
    }

    /// Number of `get_blob` calls served.
    pub fn blob_reads(&self) -> usize {
        self.blob_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for MemoryImageSource {
    fn reference(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn get_manifest(&self, instance: Option<&Digest>) -> Result<(Vec<u8>, String)> {
        self.manifests
            .get(&instance.cloned())
            .cloned()
            .ok_or_else(|| {
                TagbagError::OciImageError(format!(
                    "{}: no manifest {}",
                    self.reference(),
                    instance.map(|d| d.to_string()).unwrap_or_else(|| "(top)".to_string())
                ))
            })
    }

    async fn get_blob(&self, info: &BlobInfo) -> Result<(BlobReader, Option<u64>)> {
        let data = self
            .blobs
            .get(&info.digest)
            .cloned()
            .ok_or_else(|| TagbagError::BlobNotFound(info.digest.to_string()))?;
        self.blob_reads.fetch_add(1, Ordering::SeqCst);
        let size = data.len() as u64;
        Ok((Box::new(std::io::Cursor::new(data)), Some(size)))
    }
}

/// Image destination that records everything it receives.
#[derive(Debug, Default)]
pub struct MemoryImageDestination {
    name: String,
    blobs: Mutex<HashMap<Digest, Vec<u8>>>,
    writes: Mutex<Vec<Digest>>,
    manifests: Mutex<Vec<(Option<Digest>, Vec<u8>)>>,
    commits: AtomicUsize,
}

impl MemoryImageDestination {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Digests passed to `put_blob`, in call order.
    pub fn writes(&self) -> Vec<Digest> {
        self.writes.lock().clone()
    }

    /// Stored content of a blob.
    pub fn blob(&self, digest: &Digest) -> Option<Vec<u8>> {
        self.blobs.lock().get(digest).cloned()
    }

    /// Manifests received, as `(instance, bytes)`.
    pub fn manifests(&self) -> Vec<(Option<Digest>, Vec<u8>)> {
        self.manifests.lock().clone()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageDestination for MemoryImageDestination {
    fn reference(&self) -> String {
        format!("memory:{}", self.name)
    }

    async fn try_reusing_blob(&self, info: &BlobInfo) -> Result<Option<BlobInfo>> {
        let blobs = self.blobs.lock();
        Ok(blobs
            .get(&info.digest)
            .map(|data| BlobInfo::new(info.digest.clone()).with_size(data.len() as u64)))
    }

    async fn put_blob(
        &self,
        mut stream: BlobReader,
        info: &BlobInfo,
        _is_config: bool,
    ) -> Result<BlobInfo> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        let size = data.len() as u64;
        self.writes.lock().push(info.digest.clone());
        self.blobs.lock().insert(info.digest.clone(), data);
        Ok(BlobInfo::new(info.digest.clone()).with_size(size))
    }

    async fn put_manifest(&self, manifest: &[u8], instance: Option<&Digest>) -> Result<()> {
        self.manifests
            .lock()
            .push((instance.cloned(), manifest.to_vec()));
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
