//! Index of blobs already present somewhere in a store.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tagbag_core::Digest;

use crate::transfer::BlobInfo;

/// A blob known to the store and the file holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenBlob {
    pub info: BlobInfo,
    pub path: PathBuf,
}

/// Append-only digest → blob map shared by every image of one store.
///
/// Entries are never evicted for the lifetime of the store. Concurrent
/// inserts and lookups from parallel blob transfers are safe.
#[derive(Debug, Default)]
pub struct SeenIndex {
    blobs: DashMap<Digest, SeenBlob>,
}

impl SeenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a blob. A later insert for the same digest replaces the
    /// location; the content is identical by definition.
    pub fn add(&self, info: BlobInfo, path: impl AsRef<Path>) {
        let digest = info.digest.clone();
        self.blobs.insert(
            digest,
            SeenBlob {
                info,
                path: path.as_ref().to_path_buf(),
            },
        );
    }

    pub fn get(&self, digest: &Digest) -> Option<SeenBlob> {
        self.blobs.get(digest).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.blobs.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}
